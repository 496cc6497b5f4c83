//! Administrative pool resizing.

use tracing::info;

use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::PoolId;
use allotment_database::{Session, Store, StoreTransaction};
use allotment_entity::ResourcePool;

use super::controller::{lock_pool, log_failure, AdmissionController};

impl<S: Store> AdmissionController<S> {
    /// Grow or shrink a pool's quantity by `delta` under the pool lock.
    ///
    /// The new quantity is previewed with
    /// [`ResourcePool::adjust_quantity`] and only written if it still
    /// covers the units already consumed.
    pub async fn resize_pool(&self, pool_id: PoolId, delta: i64) -> AppResult<ResourcePool> {
        let mut session = Session::begin(self.store()).await?;
        let resized = match resize_in(&mut session, pool_id, delta).await {
            Ok(resized) => resized,
            Err(err) => {
                log_failure("resize_pool", &err);
                return Err(err);
            }
        };
        session.commit().await?;

        info!(
            %pool_id,
            delta,
            quantity = resized.quantity,
            consumed = resized.consumed,
            "Pool resized"
        );
        Ok(resized)
    }
}

async fn resize_in<T: StoreTransaction>(
    session: &mut Session<T>,
    pool_id: PoolId,
    delta: i64,
) -> AppResult<ResourcePool> {
    let mut pool = lock_pool(session, pool_id).await?;

    if pool.is_unlimited() {
        return Err(AppError::invalid_argument(
            "delta",
            format!("pool {pool_id} is unlimited and cannot be resized by delta"),
        ));
    }

    let quantity = pool.adjust_quantity(delta);
    if quantity < pool.consumed {
        return Err(AppError::conflict(format!(
            "Cannot resize pool {pool_id} to {quantity}: {} units are allocated",
            pool.consumed
        )));
    }

    pool.set_quantity(quantity);
    session.merge(pool.clone());
    session.flush().await?;
    Ok(pool)
}
