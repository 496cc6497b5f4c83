//! Convenience result type alias for Allotment.

use crate::error::AppError;

/// A specialized `Result` type for Allotment operations.
pub type AppResult<T> = Result<T, AppError>;
