//! Capacity-checked allocation, adjustment, and revocation.
//!
//! Every operation follows the same shape: lock the pool exclusively with
//! lock-and-load, evaluate the pool's accounting against the freshly read
//! values, then write the allocation and the pool's new `consumed` count in
//! the same transaction. The pool lock is always taken before any
//! allocation row lock.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use validator::Validate;

use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::{AllocationId, ConsumerId, PoolId};
use allotment_database::{Session, Store, StoreTransaction};
use allotment_entity::{Allocation, ResourcePool};

use super::request::AllocationRequest;
use super::result::{AllocationResult, BatchAllocationResult, Refusal};

/// Entry point for every operation that changes a pool's `consumed` count.
#[derive(Debug, Clone)]
pub struct AdmissionController<S> {
    store: S,
}

/// Log a failed attempt at the level its kind deserves.
pub(crate) fn log_failure(operation: &'static str, err: &AppError) {
    if err.is_retryable() {
        warn!(operation, error = %err, "Lock wait failed; the attempt may be retried");
    } else {
        debug!(operation, error = %err, "Attempt failed");
    }
}

pub(crate) async fn lock_pool<T: StoreTransaction>(
    session: &mut Session<T>,
    pool_id: PoolId,
) -> AppResult<ResourcePool> {
    let pool = session
        .lock_and_load::<ResourcePool>(pool_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Pool {pool_id} not found")))?;

    debug!(
        pool_id = %pool.id,
        quantity = pool.quantity,
        consumed = pool.consumed,
        "Pool locked"
    );
    Ok(pool)
}

impl<S: Store> AdmissionController<S> {
    /// Create a controller over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The store every attempt runs against.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try to draw `quantity` units from a pool for a consumer.
    ///
    /// Runs in its own transaction: committed on
    /// [`AllocationResult::Committed`], rolled back otherwise. A lock-wait
    /// timeout is returned as a retryable error, never as a refusal.
    pub async fn attempt_allocation(
        &self,
        pool_id: PoolId,
        consumer_id: ConsumerId,
        quantity: i64,
    ) -> AppResult<AllocationResult> {
        self.submit(AllocationRequest::new(pool_id, consumer_id, quantity))
            .await
    }

    /// [`AdmissionController::attempt_allocation`] for a prepared request.
    pub async fn submit(&self, request: AllocationRequest) -> AppResult<AllocationResult> {
        request.validate()?;

        let mut session = Session::begin(&self.store).await?;
        let result = match self.attempt_allocation_in(&mut session, &request).await {
            Ok(result) => result,
            Err(err) => {
                log_failure("attempt_allocation", &err);
                return Err(err);
            }
        };

        if result.is_committed() {
            session.commit().await?;
        } else {
            session.rollback().await?;
        }
        Ok(result)
    }

    /// Run the admission protocol inside a caller-owned session.
    ///
    /// On `Committed` the allocation and the pool update are already
    /// flushed to the session's transaction; the caller decides when to
    /// commit. On `Refused` nothing was written.
    pub async fn attempt_allocation_in<T: StoreTransaction>(
        &self,
        session: &mut Session<T>,
        request: &AllocationRequest,
    ) -> AppResult<AllocationResult> {
        request.validate()?;

        let mut pool = lock_pool(session, request.pool_id).await?;

        if !pool.entitlements_available(request.quantity) {
            let refusal = Refusal::insufficient_capacity(&pool, request.quantity);
            info!(
                pool_id = %pool.id,
                consumer_id = %request.consumer_id,
                requested = request.quantity,
                available = refusal.available,
                "Allocation refused"
            );
            return Ok(AllocationResult::Refused(refusal));
        }

        let allocation = Allocation::new(pool.id, request.consumer_id, request.quantity);
        let allocation_id = allocation.id;
        session.persist(allocation).await?;

        pool.set_consumed(pool.consumed.saturating_add(request.quantity));
        let consumed = pool.consumed;
        session.merge(pool);
        session.flush().await?;

        info!(
            pool_id = %request.pool_id,
            %allocation_id,
            consumer_id = %request.consumer_id,
            quantity = request.quantity,
            consumed,
            "Allocation committed"
        );
        Ok(AllocationResult::Committed { allocation_id })
    }

    /// Admit several requests, possibly against different pools, all or
    /// nothing.
    ///
    /// Every target pool is locked by one lock-and-load in ascending id
    /// order. If any pool lacks capacity for the sum of the requests
    /// against it, nothing is written.
    pub async fn attempt_allocations(
        &self,
        requests: &[AllocationRequest],
    ) -> AppResult<BatchAllocationResult> {
        for request in requests {
            request.validate()?;
        }

        let mut session = Session::begin(&self.store).await?;
        let result = match self.attempt_allocations_in(&mut session, requests).await {
            Ok(result) => result,
            Err(err) => {
                log_failure("attempt_allocations", &err);
                return Err(err);
            }
        };

        if result.is_committed() {
            session.commit().await?;
        } else {
            session.rollback().await?;
        }
        Ok(result)
    }

    /// Batch admission inside a caller-owned session.
    pub async fn attempt_allocations_in<T: StoreTransaction>(
        &self,
        session: &mut Session<T>,
        requests: &[AllocationRequest],
    ) -> AppResult<BatchAllocationResult> {
        let mut demand: BTreeMap<PoolId, i64> = BTreeMap::new();
        for request in requests {
            request.validate()?;
            let total = demand.entry(request.pool_id).or_insert(0);
            *total = total.saturating_add(request.quantity);
        }

        let pool_ids: Vec<PoolId> = demand.keys().copied().collect();
        let mut pools: BTreeMap<PoolId, ResourcePool> = session
            .lock_and_load_many::<ResourcePool>(&pool_ids)
            .await?
            .into_iter()
            .map(|pool| (pool.id, pool))
            .collect();

        let mut refusals = Vec::new();
        for (pool_id, requested) in &demand {
            let pool = pools
                .get(pool_id)
                .ok_or_else(|| AppError::not_found(format!("Pool {pool_id} not found")))?;
            if !pool.entitlements_available(*requested) {
                refusals.push(Refusal::insufficient_capacity(pool, *requested));
            }
        }

        if !refusals.is_empty() {
            info!(
                requests = requests.len(),
                refused_pools = refusals.len(),
                "Batch allocation refused"
            );
            return Ok(BatchAllocationResult::Refused { refusals });
        }

        let mut allocation_ids = Vec::with_capacity(requests.len());
        for request in requests {
            let allocation = Allocation::new(request.pool_id, request.consumer_id, request.quantity);
            allocation_ids.push(allocation.id);
            session.persist(allocation).await?;
        }

        for (pool_id, requested) in &demand {
            if let Some(mut pool) = pools.remove(pool_id) {
                pool.set_consumed(pool.consumed.saturating_add(*requested));
                session.merge(pool);
            }
        }
        session.flush().await?;

        info!(
            requests = requests.len(),
            pools = demand.len(),
            "Batch allocation committed"
        );
        Ok(BatchAllocationResult::Committed { allocation_ids })
    }

    /// Change an existing allocation to `quantity` units.
    ///
    /// Growing is checked against the pool like a new request for the
    /// difference; shrinking always succeeds.
    pub async fn adjust_allocation(
        &self,
        allocation_id: AllocationId,
        quantity: i64,
    ) -> AppResult<AllocationResult> {
        if quantity < 1 {
            return Err(AppError::invalid_argument(
                "quantity",
                "allocation quantity must be at least 1",
            ));
        }

        let mut session = Session::begin(&self.store).await?;
        let result = match adjust_in(&mut session, allocation_id, quantity).await {
            Ok(result) => result,
            Err(err) => {
                log_failure("adjust_allocation", &err);
                return Err(err);
            }
        };

        if result.is_committed() {
            session.commit().await?;
        } else {
            session.rollback().await?;
        }
        Ok(result)
    }

    /// Delete an allocation and return its units to the pool.
    pub async fn revoke_allocation(&self, allocation_id: AllocationId) -> AppResult<Allocation> {
        let mut session = Session::begin(&self.store).await?;
        let revoked = match revoke_in(&mut session, allocation_id).await {
            Ok(revoked) => revoked,
            Err(err) => {
                log_failure("revoke_allocation", &err);
                return Err(err);
            }
        };
        session.commit().await?;

        info!(
            %allocation_id,
            pool_id = %revoked.pool_id,
            quantity = revoked.quantity,
            "Allocation revoked"
        );
        Ok(revoked)
    }
}

/// Lock the allocation's pool, then the allocation itself.
async fn lock_allocation<T: StoreTransaction>(
    session: &mut Session<T>,
    allocation_id: AllocationId,
) -> AppResult<(ResourcePool, Allocation)> {
    let not_found = || AppError::not_found(format!("Allocation {allocation_id} not found"));

    let known = session
        .find::<Allocation>(allocation_id)
        .await?
        .ok_or_else(not_found)?;
    let pool = lock_pool(session, known.pool_id).await?;
    let allocation = session
        .lock_and_load::<Allocation>(allocation_id)
        .await?
        .ok_or_else(not_found)?;

    Ok((pool, allocation))
}

async fn adjust_in<T: StoreTransaction>(
    session: &mut Session<T>,
    allocation_id: AllocationId,
    quantity: i64,
) -> AppResult<AllocationResult> {
    let (mut pool, mut allocation) = lock_allocation(session, allocation_id).await?;
    let delta = quantity - allocation.quantity;

    if delta > 0 && !pool.entitlements_available(delta) {
        let refusal = Refusal::insufficient_capacity(&pool, delta);
        info!(
            pool_id = %pool.id,
            %allocation_id,
            requested = delta,
            available = refusal.available,
            "Allocation increase refused"
        );
        return Ok(AllocationResult::Refused(refusal));
    }

    allocation.set_quantity(quantity);
    pool.set_consumed(pool.consumed.saturating_add(delta).max(0));
    session.merge(allocation);
    session.merge(pool);
    session.flush().await?;

    info!(%allocation_id, quantity, delta, "Allocation adjusted");
    Ok(AllocationResult::Committed { allocation_id })
}

async fn revoke_in<T: StoreTransaction>(
    session: &mut Session<T>,
    allocation_id: AllocationId,
) -> AppResult<Allocation> {
    let (mut pool, allocation) = lock_allocation(session, allocation_id).await?;

    session.remove::<Allocation>(allocation_id).await?;
    pool.set_consumed(pool.consumed.saturating_sub(allocation.quantity).max(0));
    session.merge(pool);
    session.flush().await?;

    Ok(allocation)
}
