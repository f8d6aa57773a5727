//! Error types for the array orchestrator
//!
//! Provides structured error types for connection management, identifier
//! correlation, remote collaborator calls and the provisioning workflow.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Input Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    // =========================================================================
    // Correlation Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Unsupported datastore {datastore}: {reason}")]
    UnsupportedDatastore { datastore: String, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    // =========================================================================
    // Remote Collaborator Errors
    // =========================================================================
    #[error("Remote operation failed: {system} - {operation}: {reason}")]
    RemoteOperation {
        system: String,
        operation: String,
        reason: String,
    },

    #[error("Remote operation {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn remote(
        system: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::RemoteOperation {
            system: system.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether a per-candidate lookup may swallow this error and move on to
    /// the next candidate.
    pub fn is_candidate_skippable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::RemoteOperation { .. } | Error::Timeout { .. }
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteOperation { .. } | Error::Timeout { .. })
    }

    /// Check if this error came from invalid caller input
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::NotConfigured(_) | Error::InvalidIdentifier { .. }
        )
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_skippable() {
        assert!(Error::not_found("Volume", "vol-1").is_candidate_skippable());
        assert!(Error::remote("array", "list_volumes", "503").is_candidate_skippable());
        assert!(Error::Timeout {
            operation: "list_hosts".into(),
            after: Duration::from_secs(5),
        }
        .is_candidate_skippable());

        assert!(!Error::Cancelled {
            operation: "list_hosts".into()
        }
        .is_candidate_skippable());
        assert!(!Error::Conflict("two hosts".into()).is_candidate_skippable());
    }

    #[test]
    fn test_error_classes() {
        let transient = Error::remote("array", "create_volume", "connection reset");
        assert!(transient.is_transient());
        assert!(!transient.is_caller_error());

        let config_err = Error::Configuration("both sizes given".into());
        assert!(!config_err.is_transient());
        assert!(config_err.is_caller_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::not_found("StorageHost", "esxi-01");
        assert_eq!(err.to_string(), "Resource not found: StorageHost/esxi-01");
    }
}
