//! Resource pool repository implementation.

use tracing::info;

use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::PoolId;
use allotment_entity::{ResourcePool, UNLIMITED};

use crate::session::Session;
use crate::store::Store;

/// Repository for resource pool CRUD operations.
#[derive(Debug, Clone)]
pub struct PoolRepository<S> {
    store: S,
}

impl<S: Store> PoolRepository<S> {
    /// Create a new pool repository.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Find a pool by ID.
    pub async fn find_by_id(&self, id: PoolId) -> AppResult<Option<ResourcePool>> {
        let mut session = Session::begin(&self.store).await?;
        let pool = session.find::<ResourcePool>(id).await?;
        session.rollback().await?;
        Ok(pool)
    }

    /// List all pools.
    pub async fn find_all(&self) -> AppResult<Vec<ResourcePool>> {
        let mut session = Session::begin(&self.store).await?;
        let mut pools = session.find_all::<ResourcePool>().await?;
        session.rollback().await?;
        pools.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(pools)
    }

    /// Create a new, unconsumed pool.
    pub async fn create(&self, name: &str, quantity: i64) -> AppResult<ResourcePool> {
        if name.trim().is_empty() {
            return Err(AppError::invalid_argument("name", "pool name must not be blank"));
        }
        if quantity < UNLIMITED {
            return Err(AppError::invalid_argument(
                "quantity",
                format!("pool quantity must be at least {UNLIMITED} (unlimited)"),
            ));
        }

        let pool = ResourcePool::new(name.trim(), quantity);
        let mut session = Session::begin(&self.store).await?;
        session.persist(pool.clone()).await?;
        session.commit().await?;

        info!(pool_id = %pool.id, name = %pool.name, quantity, "Pool created");
        Ok(pool)
    }
}
