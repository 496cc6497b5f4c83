//! # allotment-database
//!
//! Transactional store abstraction with PostgreSQL and in-memory
//! implementations, the per-transaction [`Session`] that implements
//! lock-and-load and named locks on top of it, and autocommitting
//! repositories for plain CRUD.

pub mod connection;
pub mod migration;
pub mod repositories;
pub mod session;
pub mod store;

pub use connection::DatabasePool;
pub use session::Session;
pub use store::{MemoryStore, PgStore, RowImage, Store, StoreTransaction};
