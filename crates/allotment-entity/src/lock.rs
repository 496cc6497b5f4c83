//! Named lock anchor rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Table holding one row per named lock.
pub const NAMED_LOCK_TABLE: &str = "named_locks";

/// A durable, payload-free row whose only purpose is to be locked.
///
/// Rows are created on first acquisition and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct NamedLock {
    /// Unique lock name.
    pub name: String,
    /// When the anchor row was created.
    pub created_at: DateTime<Utc>,
}

impl NamedLock {
    /// Build a fresh anchor row for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
