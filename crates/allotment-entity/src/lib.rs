//! # allotment-entity
//!
//! Domain entity models for Allotment. Every struct in this crate
//! represents a database table row. All entities derive `Debug`, `Clone`,
//! `Serialize`, `Deserialize`, and `sqlx::FromRow`.

pub mod allocation;
pub mod entity;
pub mod lock;
pub mod pool;

pub use allocation::Allocation;
pub use entity::Entity;
pub use lock::NamedLock;
pub use pool::{ResourcePool, UNLIMITED};
