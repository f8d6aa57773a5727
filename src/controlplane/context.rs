//! Request-scoped context
//!
//! Carries the "current array" that successful lookups resolve, replacing any
//! process-wide ambient state. The current array is last-writer-wins within
//! one request; pass explicit connections when correctness matters.

use crate::error::Result;
use crate::registry::{ArrayConnection, ConnectionRegistry};
use std::sync::Arc;
use tracing::debug;

/// Context threaded through one caller's chain of operations
#[derive(Debug, Clone)]
pub struct RequestContext {
    registry: Arc<ConnectionRegistry>,
    current_array: Option<Arc<ArrayConnection>>,
}

impl RequestContext {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            current_array: None,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Array most recently resolved by a lookup in this context
    pub fn current_array(&self) -> Option<&Arc<ArrayConnection>> {
        self.current_array.as_ref()
    }

    pub fn set_current_array(&mut self, connection: Arc<ArrayConnection>) {
        debug!(endpoint = %connection.endpoint(), "Current array updated");
        self.current_array = Some(connection);
    }

    /// Array for a call: the explicit one, else the current array, else the
    /// registry default.
    pub fn resolve_array(
        &self,
        explicit: Option<&Arc<ArrayConnection>>,
    ) -> Result<Arc<ArrayConnection>> {
        if let Some(connection) = explicit.or(self.current_array.as_ref()) {
            return Ok(connection.clone());
        }
        self.registry.default_connection()
    }

    /// Candidate arrays for a scan: the explicit set, else every registered one
    pub fn candidates(
        &self,
        explicit: Option<&[Arc<ArrayConnection>]>,
    ) -> Result<Vec<Arc<ArrayConnection>>> {
        match explicit {
            Some(candidates) => Ok(candidates.to_vec()),
            None => self.registry.all(),
        }
    }
}
