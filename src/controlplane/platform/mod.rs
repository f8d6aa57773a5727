//! Compute Platform Adapters
//!
//! Provides adapters for the compute/virtualization control plane:
//! - Simulated: in-memory hosts, clusters and datastores for lab runs and tests

pub mod simulated;

pub use simulated::*;
