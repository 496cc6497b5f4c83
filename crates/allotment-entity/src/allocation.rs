//! Allocation (entitlement) entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use allotment_core::types::{AllocationId, ConsumerId, PoolId};

use crate::entity::Entity;

/// Units consumed from exactly one pool by exactly one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Allocation {
    /// Unique allocation identifier.
    pub id: AllocationId,
    /// Pool the units were drawn from.
    pub pool_id: PoolId,
    /// Principal holding the allocation.
    pub consumer_id: ConsumerId,
    /// Units consumed, at least 1.
    pub quantity: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entity for Allocation {
    type Id = AllocationId;

    const TABLE: &'static str = "allocations";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "pool_id",
        "consumer_id",
        "quantity",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> AllocationId {
        self.id
    }
}

impl Allocation {
    /// Build a new allocation record against `pool_id`.
    pub fn new(pool_id: PoolId, consumer_id: ConsumerId, quantity: i64) -> Self {
        let now = Utc::now();
        Self {
            id: AllocationId::new(),
            pool_id,
            consumer_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the allocated quantity.
    pub fn set_quantity(&mut self, quantity: i64) -> &mut Self {
        self.quantity = quantity;
        self.updated_at = Utc::now();
        self
    }
}
