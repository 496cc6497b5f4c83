//! Admission protocol behaviour, one caller at a time.

mod helpers;

use allotment_core::error::ErrorKind;
use allotment_core::types::{AllocationId, ConsumerId, LockMode, PoolId};
use allotment_database::Session;
use allotment_entity::{ResourcePool, UNLIMITED};
use allotment_service::{AllocationRequest, AllocationResult, BatchAllocationResult};

use helpers::TestApp;

#[tokio::test]
async fn test_sequential_attempts_fill_then_refuse() {
    let app = TestApp::new();
    let pool = app.create_pool(2).await;

    for _ in 0..2 {
        let result = app
            .controller
            .attempt_allocation(pool.id, ConsumerId::new(), 1)
            .await
            .unwrap();
        assert!(result.is_committed());
    }

    let third = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap();
    let refusal = third.refusal().unwrap();
    assert_eq!(refusal.available, 0);
    assert_eq!(refusal.requested, 1);
    assert_eq!(refusal.shortfall(), 1);

    assert_eq!(app.pool(pool.id).await.consumed, 2);
    app.assert_accounting(pool.id).await;
}

#[tokio::test]
async fn test_committed_allocation_is_recorded() {
    let app = TestApp::new();
    let pool = app.create_pool(10).await;
    let consumer = ConsumerId::new();

    let result = app
        .controller
        .attempt_allocation(pool.id, consumer, 4)
        .await
        .unwrap();
    let AllocationResult::Committed { allocation_id } = result else {
        panic!("expected commit, got {result:?}");
    };

    let allocation = app.allocations.find_by_id(allocation_id).await.unwrap().unwrap();
    assert_eq!(allocation.pool_id, pool.id);
    assert_eq!(allocation.consumer_id, consumer);
    assert_eq!(allocation.quantity, 4);
    assert_eq!(app.pool(pool.id).await.consumed, 4);
}

#[tokio::test]
async fn test_multi_unit_request_refused_without_side_effects() {
    let app = TestApp::new();
    let pool = app.create_pool(3).await;

    app.controller
        .attempt_allocation(pool.id, ConsumerId::new(), 2)
        .await
        .unwrap();
    let refused = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 2)
        .await
        .unwrap();

    assert_eq!(refused.refusal().unwrap().available, 1);
    assert_eq!(app.pool(pool.id).await.consumed, 2);
    assert_eq!(app.allocations.find_by_pool(pool.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_non_positive_quantity_is_rejected_before_the_store() {
    let app = TestApp::new();

    // The pool does not exist: validation must fire first.
    for quantity in [0, -3] {
        let err = app
            .controller
            .attempt_allocation(PoolId::new(), ConsumerId::new(), quantity)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("quantity"));
        assert!(!err.is_retryable());
    }
    assert_eq!(app.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_unknown_pool_is_not_found() {
    let app = TestApp::new();
    let err = app
        .controller
        .attempt_allocation(PoolId::new(), ConsumerId::new(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_lock_timeout_is_retryable_and_not_a_refusal() {
    let app = TestApp::with_lock_wait(50);
    let pool = app.create_pool(1).await;

    let mut holder = Session::begin(&app.store).await.unwrap();
    holder.lock_and_load::<ResourcePool>(pool.id).await.unwrap();

    let err = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::LockTimeout);
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    let retried = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap();
    assert!(retried.is_committed());
}

#[tokio::test]
async fn test_unlimited_pool_never_refuses() {
    let app = TestApp::new();
    let pool = app.create_pool(UNLIMITED).await;

    for quantity in [1, 1_000, 1_000_000] {
        let result = app
            .controller
            .attempt_allocation(pool.id, ConsumerId::new(), quantity)
            .await
            .unwrap();
        assert!(result.is_committed());
    }

    let stored = app.pool(pool.id).await;
    assert_eq!(stored.consumed, 1_001_001);
    assert!(!stored.is_overflowing());
}

#[tokio::test]
async fn test_attempts_compose_inside_one_session() {
    let app = TestApp::new();
    let pool = app.create_pool(2).await;

    let mut session = Session::begin(&app.store).await.unwrap();
    session
        .acquire_named_lock("consumer-onboarding", LockMode::PessimisticWrite)
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let request = AllocationRequest::new(pool.id, ConsumerId::new(), 1);
        outcomes.push(
            app.controller
                .attempt_allocation_in(&mut session, &request)
                .await
                .unwrap(),
        );
        session
            .acquire_named_lock("consumer-onboarding", LockMode::PessimisticWrite)
            .await
            .unwrap();
    }
    session.commit().await.unwrap();

    assert!(outcomes[0].is_committed());
    assert!(outcomes[1].is_committed());
    assert_eq!(outcomes[2].refusal().unwrap().available, 0);
    assert_eq!(app.pool(pool.id).await.consumed, 2);
    app.assert_accounting(pool.id).await;
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let app = TestApp::new();
    let roomy = app.create_pool(2).await;
    let tight = app.create_pool(1).await;

    let refused = app
        .controller
        .attempt_allocations(&[
            AllocationRequest::new(roomy.id, ConsumerId::new(), 1),
            AllocationRequest::new(tight.id, ConsumerId::new(), 1),
            AllocationRequest::new(tight.id, ConsumerId::new(), 1),
        ])
        .await
        .unwrap();

    let BatchAllocationResult::Refused { refusals } = refused else {
        panic!("expected refusal, got {refused:?}");
    };
    assert_eq!(refusals.len(), 1);
    assert_eq!(refusals[0].pool_id, tight.id);
    assert_eq!(refusals[0].requested, 2);
    assert_eq!(app.pool(roomy.id).await.consumed, 0);
    assert_eq!(app.pool(tight.id).await.consumed, 0);

    let committed = app
        .controller
        .attempt_allocations(&[
            AllocationRequest::new(roomy.id, ConsumerId::new(), 1),
            AllocationRequest::new(roomy.id, ConsumerId::new(), 1),
            AllocationRequest::new(tight.id, ConsumerId::new(), 1),
        ])
        .await
        .unwrap();

    let BatchAllocationResult::Committed { allocation_ids } = committed else {
        panic!("expected commit, got {committed:?}");
    };
    assert_eq!(allocation_ids.len(), 3);
    assert_eq!(app.pool(roomy.id).await.consumed, 2);
    assert_eq!(app.pool(tight.id).await.consumed, 1);
    app.assert_accounting(roomy.id).await;
    app.assert_accounting(tight.id).await;
}

#[tokio::test]
async fn test_batch_with_unknown_pool_is_not_found() {
    let app = TestApp::new();
    let pool = app.create_pool(5).await;

    let err = app
        .controller
        .attempt_allocations(&[
            AllocationRequest::new(pool.id, ConsumerId::new(), 1),
            AllocationRequest::new(PoolId::new(), ConsumerId::new(), 1),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(app.pool(pool.id).await.consumed, 0);
}

#[tokio::test]
async fn test_adjust_allocation() {
    let app = TestApp::new();
    let pool = app.create_pool(5).await;
    let allocation_id = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 2)
        .await
        .unwrap()
        .allocation_id()
        .unwrap();

    let grown = app.controller.adjust_allocation(allocation_id, 5).await.unwrap();
    assert!(grown.is_committed());
    assert_eq!(app.pool(pool.id).await.consumed, 5);

    let too_big = app.controller.adjust_allocation(allocation_id, 6).await.unwrap();
    assert_eq!(too_big.refusal().unwrap().requested, 1);
    assert_eq!(too_big.refusal().unwrap().available, 0);

    let shrunk = app.controller.adjust_allocation(allocation_id, 1).await.unwrap();
    assert!(shrunk.is_committed());
    assert_eq!(app.pool(pool.id).await.consumed, 1);
    app.assert_accounting(pool.id).await;

    let err = app.controller.adjust_allocation(allocation_id, 0).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.starts_with("quantity:"));

    let err = app
        .controller
        .adjust_allocation(AllocationId::new(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_revoke_returns_units() {
    let app = TestApp::new();
    let pool = app.create_pool(1).await;
    let allocation_id = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap()
        .allocation_id()
        .unwrap();

    let revoked = app.controller.revoke_allocation(allocation_id).await.unwrap();
    assert_eq!(revoked.id, allocation_id);
    assert_eq!(app.pool(pool.id).await.consumed, 0);
    assert!(app.allocations.find_by_id(allocation_id).await.unwrap().is_none());

    let err = app.controller.revoke_allocation(allocation_id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let again = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap();
    assert!(again.is_committed());
}

#[tokio::test]
async fn test_resize_pool() {
    let app = TestApp::new();
    let pool = app.create_pool(10).await;
    app.controller
        .attempt_allocation(pool.id, ConsumerId::new(), 6)
        .await
        .unwrap();

    let grown = app.controller.resize_pool(pool.id, 2).await.unwrap();
    assert_eq!(grown.quantity, 12);

    let shrunk = app.controller.resize_pool(pool.id, -6).await.unwrap();
    assert_eq!(shrunk.quantity, 6);
    assert_eq!(app.pool(pool.id).await.quantity, 6);

    let err = app.controller.resize_pool(pool.id, -1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(app.pool(pool.id).await.quantity, 6);

    let unlimited = app.create_pool(UNLIMITED).await;
    let err = app.controller.resize_pool(unlimited.id, 5).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.starts_with("delta:"));
}

#[tokio::test]
async fn test_resize_floors_at_zero() {
    let app = TestApp::new();
    let pool = app.create_pool(1).await;

    let drained = app.controller.resize_pool(pool.id, -20).await.unwrap();
    assert_eq!(drained.quantity, 0);

    let refused = app
        .controller
        .attempt_allocation(pool.id, ConsumerId::new(), 1)
        .await
        .unwrap();
    assert!(!refused.is_committed());
}
