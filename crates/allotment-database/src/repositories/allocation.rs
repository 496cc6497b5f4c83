//! Allocation repository implementation.

use allotment_core::result::AppResult;
use allotment_core::types::{AllocationId, PoolId};
use allotment_entity::Allocation;

use crate::session::Session;
use crate::store::Store;

/// Repository for allocation lookups.
///
/// Allocations are created and revoked only together with their pool's
/// `consumed` counter, so writes live in the admission controller.
#[derive(Debug, Clone)]
pub struct AllocationRepository<S> {
    store: S,
}

impl<S: Store> AllocationRepository<S> {
    /// Create a new allocation repository.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Find an allocation by ID.
    pub async fn find_by_id(&self, id: AllocationId) -> AppResult<Option<Allocation>> {
        let mut session = Session::begin(&self.store).await?;
        let allocation = session.find::<Allocation>(id).await?;
        session.rollback().await?;
        Ok(allocation)
    }

    /// List the allocations drawn from a pool, oldest first.
    pub async fn find_by_pool(&self, pool_id: PoolId) -> AppResult<Vec<Allocation>> {
        let mut session = Session::begin(&self.store).await?;
        let mut allocations = session.find_by::<Allocation>("pool_id", pool_id).await?;
        session.rollback().await?;
        allocations.sort_by_key(|a| (a.created_at, a.id));
        Ok(allocations)
    }

    /// Sum of allocated units for a pool.
    pub async fn total_for_pool(&self, pool_id: PoolId) -> AppResult<i64> {
        Ok(self
            .find_by_pool(pool_id)
            .await?
            .iter()
            .map(|a| a.quantity)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allotment_core::types::ConsumerId;
    use allotment_entity::ResourcePool;

    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_find_by_pool() {
        let store = MemoryStore::default();
        let pool = ResourcePool::new("seats", 5);
        let other = ResourcePool::new("other", 5);
        let first = Allocation::new(pool.id, ConsumerId::new(), 2);
        let second = Allocation::new(pool.id, ConsumerId::new(), 1);
        let elsewhere = Allocation::new(other.id, ConsumerId::new(), 1);

        let mut session = Session::begin(&store).await.unwrap();
        session.persist(pool.clone()).await.unwrap();
        session.persist(other).await.unwrap();
        session.persist(first.clone()).await.unwrap();
        session.persist(second.clone()).await.unwrap();
        session.persist(elsewhere).await.unwrap();
        session.commit().await.unwrap();

        let repo = AllocationRepository::new(store);
        let found = repo.find_by_pool(pool.id).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&first));
        assert!(found.contains(&second));
        assert_eq!(repo.total_for_pool(pool.id).await.unwrap(), 3);
        assert_eq!(repo.find_by_id(first.id).await.unwrap(), Some(first));
    }
}
