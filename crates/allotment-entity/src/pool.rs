//! Resource pool entity and its quantity accounting.
//!
//! The accounting functions are pure: they read a snapshot and never
//! write back, so they can be evaluated any number of times inside a
//! locked critical section. Mutations go through the explicit setters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use allotment_core::types::PoolId;

use crate::entity::Entity;

/// Quantity sentinel for a pool with no capacity limit.
pub const UNLIMITED: i64 = -1;

/// A finite or unlimited grantable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ResourcePool {
    /// Unique pool identifier.
    pub id: PoolId,
    /// Display name.
    pub name: String,
    /// Total units, or [`UNLIMITED`].
    pub quantity: i64,
    /// Units currently allocated.
    pub consumed: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entity for ResourcePool {
    type Id = PoolId;

    const TABLE: &'static str = "resource_pools";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "quantity",
        "consumed",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> PoolId {
        self.id
    }
}

impl ResourcePool {
    /// Build a new, unconsumed pool.
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        let now = Utc::now();
        Self {
            id: PoolId::new(),
            name: name.into(),
            quantity,
            consumed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the pool has no capacity limit.
    pub fn is_unlimited(&self) -> bool {
        self.quantity < 0
    }

    /// Whether more units are consumed than the pool holds.
    pub fn is_overflowing(&self) -> bool {
        if self.quantity == UNLIMITED {
            return false;
        }
        self.consumed > self.quantity
    }

    /// Whether `requested` more units fit in the pool.
    pub fn entitlements_available(&self, requested: i64) -> bool {
        if self.is_unlimited() {
            return true;
        }

        match self.consumed.checked_add(requested) {
            Some(total) => total <= self.quantity,
            None => false,
        }
    }

    /// Units that can still be granted, or `None` when unlimited.
    pub fn available(&self) -> Option<i64> {
        if self.is_unlimited() {
            return None;
        }
        Some((self.quantity - self.consumed).max(0))
    }

    /// Preview the quantity after adding `delta`, floored at zero.
    ///
    /// Does not touch `self.quantity`; apply an accepted value with
    /// [`ResourcePool::set_quantity`].
    pub fn adjust_quantity(&self, delta: i64) -> i64 {
        self.quantity.saturating_add(delta).max(0)
    }

    /// Overwrite the pool's total quantity.
    pub fn set_quantity(&mut self, quantity: i64) -> &mut Self {
        self.quantity = quantity;
        self.updated_at = Utc::now();
        self
    }

    /// Overwrite the consumed count.
    pub fn set_consumed(&mut self, consumed: i64) -> &mut Self {
        self.consumed = consumed;
        self.updated_at = Utc::now();
        self
    }

    /// Parse a quantity as written by administrators.
    ///
    /// `"unlimited"` (any case) yields [`UNLIMITED`]; anything that is not
    /// an integer yields `0`.
    pub fn parse_quantity(input: &str) -> i64 {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return UNLIMITED;
        }
        trimmed.parse().unwrap_or(0)
    }
}
