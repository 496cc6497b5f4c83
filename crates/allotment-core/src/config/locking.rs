//! Row and named lock configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lock acquisition settings shared by every store implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Largest id collection accepted by a single lock-and-load call.
    #[serde(default = "default_max_batch_ids")]
    pub max_batch_ids: usize,
    /// Number of ids bound per `= ANY($1)` query when loading a batch.
    #[serde(default = "default_in_block_size")]
    pub in_block_size: usize,
    /// How long a transaction waits for a row lock before giving up.
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub lock_wait_timeout_ms: u64,
}

impl LockingConfig {
    /// The lock wait timeout as a [`Duration`].
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    /// Reject settings that would make every lock call fail.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_batch_ids == 0 {
            return Err(AppError::configuration(
                "locking.max_batch_ids must be greater than zero",
            ));
        }
        if self.in_block_size == 0 {
            return Err(AppError::configuration(
                "locking.in_block_size must be greater than zero",
            ));
        }
        if self.lock_wait_timeout_ms == 0 {
            return Err(AppError::configuration(
                "locking.lock_wait_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            max_batch_ids: default_max_batch_ids(),
            in_block_size: default_in_block_size(),
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
        }
    }
}

fn default_max_batch_ids() -> usize {
    1000
}

fn default_in_block_size() -> usize {
    1000
}

fn default_lock_wait_timeout_ms() -> u64 {
    10_000
}
