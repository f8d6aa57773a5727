//! Connection Registry Module
//!
//! Process-wide set of authenticated array connections with an optional
//! default, used to resolve which array(s) an operation targets.

pub mod connection_registry;
pub mod events;

pub use connection_registry::*;
pub use events::*;
