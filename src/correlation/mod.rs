//! Correlation Module
//!
//! Identifier parsing and the lookups that tie compute-side objects to the
//! arrays backing them.

pub mod correlator;
pub mod identifiers;

pub use correlator::*;
pub use identifiers::*;
