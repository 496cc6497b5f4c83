//! Outcomes of an admission attempt.
//!
//! A capacity refusal is an expected outcome, not an error: it travels as
//! [`AllocationResult::Refused`] so callers can tell "the pool is full"
//! apart from validation, lock-timeout, and store failures.

use serde::{Deserialize, Serialize};

use allotment_core::types::{AllocationId, PoolId};
use allotment_entity::ResourcePool;

/// Why a pool could not satisfy a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    /// The pool that refused.
    pub pool_id: PoolId,
    /// Units asked for.
    pub requested: i64,
    /// Units the pool could still grant when the request was evaluated.
    pub available: i64,
    /// Human-readable explanation.
    pub reason: String,
}

impl Refusal {
    /// Refusal for a locked pool that lacks `requested` free units.
    pub fn insufficient_capacity(pool: &ResourcePool, requested: i64) -> Self {
        let available = pool.available().unwrap_or(i64::MAX);
        Self {
            pool_id: pool.id,
            requested,
            available,
            reason: format!(
                "Insufficient capacity in pool '{}': requested {requested}, available {available}",
                pool.name
            ),
        }
    }

    /// How many units short the pool was.
    pub fn shortfall(&self) -> i64 {
        self.requested.saturating_sub(self.available).max(0)
    }
}

/// Outcome of a single allocation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationResult {
    /// The allocation was recorded and the pool's consumed count raised,
    /// in one committed transaction.
    Committed {
        /// The new (or adjusted) allocation.
        allocation_id: AllocationId,
    },
    /// Nothing was written.
    Refused(Refusal),
}

impl AllocationResult {
    /// Whether the attempt committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// The committed allocation's id.
    pub fn allocation_id(&self) -> Option<AllocationId> {
        match self {
            Self::Committed { allocation_id } => Some(*allocation_id),
            Self::Refused(_) => None,
        }
    }

    /// The refusal, if any.
    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Self::Committed { .. } => None,
            Self::Refused(refusal) => Some(refusal),
        }
    }
}

/// Outcome of an all-or-nothing batch of allocation attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchAllocationResult {
    /// Every request committed; ids follow request order.
    Committed {
        /// One id per request.
        allocation_ids: Vec<AllocationId>,
    },
    /// Nothing was written. One refusal per pool that lacked capacity.
    Refused {
        /// Failing pools in ascending id order.
        refusals: Vec<Refusal>,
    },
}

impl BatchAllocationResult {
    /// Whether the batch committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_reports_shortfall() {
        let mut pool = ResourcePool::new("seats", 3);
        pool.consumed = 2;

        let refusal = Refusal::insufficient_capacity(&pool, 4);
        assert_eq!(refusal.available, 1);
        assert_eq!(refusal.shortfall(), 3);
        assert!(refusal.reason.contains("seats"));
    }

    #[test]
    fn test_result_serializes_with_outcome_tag() {
        let pool = ResourcePool::new("seats", 0);
        let refused = AllocationResult::Refused(Refusal::insufficient_capacity(&pool, 1));

        let json = serde_json::to_value(&refused).unwrap();
        assert_eq!(json["outcome"], "refused");
        assert_eq!(json["available"], 0);
        assert!(!refused.is_committed());
        assert!(refused.allocation_id().is_none());
    }
}
