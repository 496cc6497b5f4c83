//! # allotment-core
//!
//! Core crate for Allotment. Contains configuration schemas, typed
//! identifiers, lock strengths, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Allotment crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
