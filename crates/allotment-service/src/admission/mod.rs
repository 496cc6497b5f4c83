//! Admission control protocol.

pub mod controller;
pub mod request;
pub mod resize;
pub mod result;

pub use controller::AdmissionController;
pub use request::AllocationRequest;
pub use result::{AllocationResult, BatchAllocationResult, Refusal};
