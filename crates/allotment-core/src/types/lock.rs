//! Lock modes and the two pessimistic strengths the stores can honour.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A lock mode as requested by a caller.
///
/// Only the pessimistic modes map to a row lock; the others exist so that
/// callers forwarding a mode from elsewhere get a validation error instead
/// of silently running unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// No lock at all.
    None,
    /// Version-checked, lock-free access.
    Optimistic,
    /// Pessimistic shared lock.
    PessimisticRead,
    /// Pessimistic exclusive lock.
    PessimisticWrite,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Optimistic => write!(f, "optimistic"),
            Self::PessimisticRead => write!(f, "pessimistic_read"),
            Self::PessimisticWrite => write!(f, "pessimistic_write"),
        }
    }
}

/// Strength of a row lock held until the owning transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrength {
    /// Co-readable with other shared holders, blocks writers.
    SharedRead,
    /// Blocks every other reader-with-lock and writer of the row.
    ExclusiveWrite,
}

impl LockStrength {
    /// Whether a lock of this strength held by one transaction lets
    /// another transaction take `other` on the same row.
    pub fn compatible_with(self, other: LockStrength) -> bool {
        matches!(
            (self, other),
            (LockStrength::SharedRead, LockStrength::SharedRead)
        )
    }

    /// The stronger of two strengths.
    pub fn max(self, other: LockStrength) -> LockStrength {
        if self == LockStrength::ExclusiveWrite || other == LockStrength::ExclusiveWrite {
            LockStrength::ExclusiveWrite
        } else {
            LockStrength::SharedRead
        }
    }
}

impl fmt::Display for LockStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedRead => write!(f, "shared_read"),
            Self::ExclusiveWrite => write!(f, "exclusive_write"),
        }
    }
}

impl TryFrom<LockMode> for LockStrength {
    type Error = AppError;

    fn try_from(mode: LockMode) -> Result<Self, Self::Error> {
        match mode {
            LockMode::PessimisticRead => Ok(LockStrength::SharedRead),
            LockMode::PessimisticWrite => Ok(LockStrength::ExclusiveWrite),
            other => Err(AppError::invalid_argument(
                "strength",
                format!("unsupported lock mode: {other}"),
            )),
        }
    }
}

impl From<LockStrength> for LockMode {
    fn from(strength: LockStrength) -> Self {
        match strength {
            LockStrength::SharedRead => LockMode::PessimisticRead,
            LockStrength::ExclusiveWrite => LockMode::PessimisticWrite,
        }
    }
}
