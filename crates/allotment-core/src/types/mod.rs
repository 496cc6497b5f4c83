//! Shared value types.

pub mod id;
pub mod lock;

pub use id::{AllocationId, ConsumerId, PoolId};
pub use lock::{LockMode, LockStrength};
