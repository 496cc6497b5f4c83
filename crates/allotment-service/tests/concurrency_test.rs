//! Concurrent admission races against a single pool.

mod helpers;

use std::sync::Arc;

use futures::future::join_all;

use allotment_core::types::{ConsumerId, PoolId};
use allotment_database::MemoryStore;
use allotment_entity::UNLIMITED;
use allotment_service::{AdmissionController, AllocationResult};

use helpers::TestApp;

async fn race(
    controller: &Arc<AdmissionController<MemoryStore>>,
    pool_id: PoolId,
    attempts: usize,
) -> Vec<AllocationResult> {
    let handles = (0..attempts).map(|_| {
        let controller = Arc::clone(controller);
        tokio::spawn(async move {
            controller
                .attempt_allocation(pool_id, ConsumerId::new(), 1)
                .await
        })
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_racers_for_one_unit() {
    let app = TestApp::new();
    let pool = app.create_pool(1).await;
    let controller = Arc::new(app.controller.clone());

    let results = race(&controller, pool.id, 2).await;

    let committed = results.iter().filter(|r| r.is_committed()).count();
    assert_eq!(committed, 1);

    let refusals: Vec<_> = results.iter().filter_map(|r| r.refusal()).collect();
    assert_eq!(refusals.len(), 1);
    assert_eq!(refusals[0].available, 0);
    assert_eq!(refusals[0].pool_id, pool.id);

    assert_eq!(app.pool(pool.id).await.consumed, 1);
    app.assert_accounting(pool.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_oversells_under_contention() {
    for capacity in [0_i64, 1, 5, 12] {
        let app = TestApp::new();
        let pool = app.create_pool(capacity).await;
        let controller = Arc::new(app.controller.clone());

        let results = race(&controller, pool.id, 30).await;

        let committed = results.iter().filter(|r| r.is_committed()).count();
        assert_eq!(committed as i64, capacity);
        assert!(
            results
                .iter()
                .filter_map(|r| r.refusal())
                .all(|refusal| refusal.available == 0)
        );

        let stored = app.pool(pool.id).await;
        assert_eq!(stored.consumed, capacity);
        app.assert_accounting(pool.id).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlimited_pool_admits_everyone() {
    let app = TestApp::new();
    let pool = app.create_pool(UNLIMITED).await;
    let controller = Arc::new(app.controller.clone());

    let results = race(&controller, pool.id, 20).await;

    assert!(results.iter().all(AllocationResult::is_committed));
    assert_eq!(app.pool(pool.id).await.consumed, 20);
    app.assert_accounting(pool.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revokes_racing_allocations_keep_accounting() {
    let app = TestApp::new();
    let pool = app.create_pool(3).await;
    let controller = Arc::new(app.controller.clone());

    let mut held = Vec::new();
    for _ in 0..3 {
        let result = controller
            .attempt_allocation(pool.id, ConsumerId::new(), 1)
            .await
            .unwrap();
        held.push(result.allocation_id().unwrap());
    }

    let revokes = held.into_iter().map(|allocation_id| {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.revoke_allocation(allocation_id).await })
    });
    let (revoked, allocated) = tokio::join!(join_all(revokes), race(&controller, pool.id, 6));

    assert!(revoked.into_iter().all(|r| r.unwrap().is_ok()));
    let committed = allocated.iter().filter(|r| r.is_committed()).count() as i64;
    assert!(committed <= 3);

    let stored = app.pool(pool.id).await;
    assert_eq!(stored.consumed, committed);
    app.assert_accounting(pool.id).await;
}
