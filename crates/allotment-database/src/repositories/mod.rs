//! Autocommitting repositories for plain CRUD.
//!
//! Each call runs in its own short transaction. Anything that must see
//! or hold a lock goes through a [`Session`](crate::Session) instead.

pub mod allocation;
pub mod pool;

pub use allocation::AllocationRepository;
pub use pool::PoolRepository;
