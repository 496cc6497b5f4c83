//! Named mutex locks.

use tracing::info;

use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::{LockMode, LockStrength};

use super::Session;
use crate::store::StoreTransaction;

impl<T: StoreTransaction> Session<T> {
    /// Acquire the persisted lock called `name` for the rest of this
    /// session's transaction.
    ///
    /// The anchor row is created on first use. Acquiring a lock this
    /// transaction already holds returns immediately. Only the two
    /// pessimistic modes are accepted; input is validated before the
    /// store is touched.
    pub async fn acquire_named_lock(&mut self, name: &str, mode: LockMode) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::invalid_argument(
                "name",
                "lock name must not be blank",
            ));
        }
        let strength = LockStrength::try_from(mode)?;

        let anchor = self.tx.lock_named(name, strength).await?;
        info!(
            lock = %anchor.name,
            %strength,
            created_at = %anchor.created_at,
            "Named lock acquired"
        );
        Ok(())
    }
}
