//! Registry Events
//!
//! Events emitted by the connection registry so that long-running callers can
//! react to arrays being added, removed or promoted to default.

use serde::{Deserialize, Serialize};

/// Events emitted by the connection registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A new array connection was registered
    ConnectionRegistered {
        endpoint: String,
        array_id: String,
        is_default: bool,
    },

    /// A connection became the registry default
    DefaultChanged { endpoint: String, array_id: String },

    /// A connection was explicitly disconnected
    ConnectionRemoved {
        endpoint: String,
        array_id: String,
        was_default: bool,
    },
}

impl RegistryEvent {
    /// Get the endpoint associated with this event
    pub fn endpoint(&self) -> &str {
        match self {
            RegistryEvent::ConnectionRegistered { endpoint, .. } => endpoint,
            RegistryEvent::DefaultChanged { endpoint, .. } => endpoint,
            RegistryEvent::ConnectionRemoved { endpoint, .. } => endpoint,
        }
    }

    /// Check if this event changed which connection is the default
    pub fn affects_default(&self) -> bool {
        matches!(
            self,
            RegistryEvent::DefaultChanged { .. }
                | RegistryEvent::ConnectionRemoved {
                    was_default: true,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_endpoint() {
        let event = RegistryEvent::ConnectionRegistered {
            endpoint: "10.0.0.5".to_string(),
            array_id: "2dcf29ad".to_string(),
            is_default: false,
        };
        assert_eq!(event.endpoint(), "10.0.0.5");
        assert!(!event.affects_default());
    }

    #[test]
    fn test_removal_of_default_affects_default() {
        let event = RegistryEvent::ConnectionRemoved {
            endpoint: "10.0.0.5".to_string(),
            array_id: "2dcf29ad".to_string(),
            was_default: true,
        };
        assert!(event.affects_default());
    }
}
