//! Unified application error types for Allotment.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Capacity refusals are not errors;
//! they travel as a regular result value from the admission controller.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The requested resource was not found.
    NotFound,
    /// Input validation failed.
    Validation,
    /// A conflict occurred (constraint violation, invariant breach, etc.).
    Conflict,
    /// A lock could not be acquired in time, or the store aborted the
    /// transaction to break a deadlock.
    LockTimeout,
    /// An internal error occurred.
    Internal,
    /// A database error occurred.
    Database,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::LockTimeout => write!(f, "LOCK_TIMEOUT"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::Database => write!(f, "DATABASE"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
        }
    }
}

/// The unified application error used throughout Allotment.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a validation error naming the offending parameter.
    pub fn invalid_argument(parameter: &str, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Validation, format!("{parameter}: {message}"))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a lock-timeout error.
    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LockTimeout, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Whether the whole operation may be retried from the top.
    ///
    /// Only lock waits qualify: nothing was committed, and a later attempt
    /// may find the row free. Validation and store failures will fail the
    /// same way again.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::LockTimeout
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::with_source(ErrorKind::Validation, err.to_string(), err)
    }
}

/// SQLSTATE codes that mean "nothing was committed, try again".
#[cfg(feature = "sqlx")]
const RETRYABLE_SQLSTATES: [&str; 3] = [
    // lock_not_available, raised when lock_timeout expires
    "55P03",
    // deadlock_detected
    "40P01",
    // serialization_failure
    "40001",
];

#[cfg(feature = "sqlx")]
impl AppError {
    /// Classify a sqlx error, keeping `context` as the message prefix.
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if RETRYABLE_SQLSTATES.contains(&code.as_ref()) => {
                    ErrorKind::LockTimeout
                }
                Some(code) if code.starts_with("23") => ErrorKind::Conflict,
                _ => ErrorKind::Database,
            },
            _ => ErrorKind::Database,
        };
        Self::with_source(kind, format!("{context}: {err}"), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_timeouts_are_retryable() {
        assert!(AppError::lock_timeout("waited too long").is_retryable());
        assert!(!AppError::validation("bad").is_retryable());
        assert!(!AppError::database("down").is_retryable());
        assert!(!AppError::conflict("dup").is_retryable());
    }

    #[test]
    fn test_invalid_argument_names_parameter() {
        let err = AppError::invalid_argument("name", "lock name must not be blank");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "name: lock name must not be blank");
        assert_eq!(err.to_string(), "VALIDATION: name: lock name must not be blank");
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = AppError::from_sqlx("Failed to find pool", sqlx::Error::RowNotFound);
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.starts_with("Failed to find pool"));
    }
}
