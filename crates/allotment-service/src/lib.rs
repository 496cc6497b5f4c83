//! # allotment-service
//!
//! Admission control for resource pools. The [`AdmissionController`]
//! serializes every capacity decision on a pool behind an exclusive row
//! lock taken with lock-and-load, so concurrent callers in any number of
//! processes can never oversell a pool.

pub mod admission;

pub use admission::{
    AdmissionController, AllocationRequest, AllocationResult, BatchAllocationResult, Refusal,
};
