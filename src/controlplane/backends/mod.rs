//! Storage Array Adapters
//!
//! Provides adapters for the storage-array control plane:
//! - Simulated: in-memory array and connector for lab runs and tests

pub mod simulated;

pub use simulated::*;
