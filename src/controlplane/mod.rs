//! Control Plane Module
//!
//! Guarded remote calls, request context, host provisioning and the
//! workload-domain workflow, plus the simulated collaborators used by the
//! binary and the tests.

pub mod backends;
pub mod context;
pub mod guard;
pub mod hosts;
pub mod ledger;
pub mod platform;
pub mod workflow;

pub use backends::{SimulatedArray, SimulatedArrayConnector};
pub use context::*;
pub use guard::*;
pub use hosts::*;
pub use ledger::*;
pub use platform::{SimulatedCompute, SOFTWARE_ISCSI_DEVICE};
pub use workflow::*;
