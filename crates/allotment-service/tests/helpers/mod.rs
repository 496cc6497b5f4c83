//! Shared fixtures for admission tests.

#![allow(dead_code)]

use allotment_core::config::LockingConfig;
use allotment_core::types::PoolId;
use allotment_database::MemoryStore;
use allotment_database::repositories::{AllocationRepository, PoolRepository};
use allotment_entity::ResourcePool;
use allotment_service::AdmissionController;

/// An admission controller over a fresh in-memory store.
pub struct TestApp {
    pub store: MemoryStore,
    pub controller: AdmissionController<MemoryStore>,
    pub pools: PoolRepository<MemoryStore>,
    pub allocations: AllocationRepository<MemoryStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_locking(LockingConfig::default())
    }

    /// A store whose lock waits give up after `ms` milliseconds.
    pub fn with_lock_wait(ms: u64) -> Self {
        Self::with_locking(LockingConfig {
            lock_wait_timeout_ms: ms,
            ..LockingConfig::default()
        })
    }

    pub fn with_locking(locking: LockingConfig) -> Self {
        let store = MemoryStore::new(locking);
        Self {
            controller: AdmissionController::new(store.clone()),
            pools: PoolRepository::new(store.clone()),
            allocations: AllocationRepository::new(store.clone()),
            store,
        }
    }

    pub async fn create_pool(&self, quantity: i64) -> ResourcePool {
        self.pools.create("test-pool", quantity).await.unwrap()
    }

    pub async fn pool(&self, id: PoolId) -> ResourcePool {
        self.pools.find_by_id(id).await.unwrap().unwrap()
    }

    /// Assert the pool's consumed count matches its allocation records.
    pub async fn assert_accounting(&self, id: PoolId) {
        let pool = self.pool(id).await;
        let allocated = self.allocations.total_for_pool(id).await.unwrap();
        assert_eq!(pool.consumed, allocated, "consumed out of sync with allocations");
        assert!(!pool.is_overflowing(), "pool oversold: {pool:?}");
    }
}
