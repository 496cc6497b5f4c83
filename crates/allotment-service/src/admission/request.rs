//! Allocation request input.

use serde::{Deserialize, Serialize};
use validator::Validate;

use allotment_core::types::{ConsumerId, PoolId};

/// A consumer asking for units from one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AllocationRequest {
    /// Pool to draw from.
    pub pool_id: PoolId,
    /// Principal that will own the allocation.
    pub consumer_id: ConsumerId,
    /// Units requested.
    #[validate(range(min = 1, message = "requested quantity must be at least 1"))]
    pub quantity: i64,
}

impl AllocationRequest {
    /// Build a request.
    pub fn new(pool_id: PoolId, consumer_id: ConsumerId, quantity: i64) -> Self {
        Self {
            pool_id,
            consumer_id,
            quantity,
        }
    }
}
