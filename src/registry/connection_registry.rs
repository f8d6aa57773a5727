//! Array Connection Registry
//!
//! Holds every authenticated array connection plus at most one default.
//! Lookups that omit an explicit array fall back to this registry.

use crate::domain::ports::{ArrayConnector, ArrayIdentity, Credential, StorageArrayRef};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::RegistryEvent;

// =============================================================================
// Array Connection
// =============================================================================

/// One authenticated session to a storage array
pub struct ArrayConnection {
    /// Management endpoint (address or FQDN)
    endpoint: String,
    /// Identity cached at connect time
    identity: ArrayIdentity,
    /// Credential, replaced on token refresh
    credential: RwLock<Credential>,
    /// Session-bound control-plane API
    api: StorageArrayRef,
    /// Connection timestamp
    connected_at: DateTime<Utc>,
}

impl ArrayConnection {
    pub fn new(
        endpoint: impl Into<String>,
        credential: Credential,
        identity: ArrayIdentity,
        api: StorageArrayRef,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity,
            credential: RwLock::new(credential),
            api,
            connected_at: Utc::now(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Cached array serial
    pub fn array_id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &ArrayIdentity {
        &self.identity
    }

    pub fn api(&self) -> &StorageArrayRef {
        &self.api
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn credential(&self) -> Credential {
        self.credential.read().clone()
    }

    /// Replace the session credential after a token refresh
    pub fn refresh_credential(&self, credential: Credential) {
        debug!(endpoint = %self.endpoint, "Refreshing array credential");
        *self.credential.write() = credential;
    }

    /// Case-insensitive comparison against the cached array serial
    pub fn matches_id(&self, array_id: &str) -> bool {
        self.identity.id.eq_ignore_ascii_case(array_id)
    }
}

impl std::fmt::Debug for ArrayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayConnection")
            .field("endpoint", &self.endpoint)
            .field("array_id", &self.identity.id)
            .field("array_name", &self.identity.name)
            .field("version", &self.identity.version)
            .finish()
    }
}

// =============================================================================
// Registration Role
// =============================================================================

/// Role a connection takes when registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationRole {
    Default,
    NonDefault,
}

impl RegistrationRole {
    /// Build a role from the two mutually exclusive caller switches.
    /// Exactly one must be set.
    pub fn from_flags(default: bool, non_default: bool) -> Result<Self> {
        match (default, non_default) {
            (true, false) => Ok(RegistrationRole::Default),
            (false, true) => Ok(RegistrationRole::NonDefault),
            (true, true) => Err(Error::Configuration(
                "a connection cannot be both the default and a non-default connection".into(),
            )),
            (false, false) => Err(Error::Configuration(
                "choose whether the connection is the default or a non-default connection".into(),
            )),
        }
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

#[derive(Debug, Default)]
struct RegistryStats {
    registrations: AtomicU64,
    removals: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStatsSnapshot {
    pub connections: u64,
    pub has_default: bool,
    pub registrations: u64,
    pub removals: u64,
}

// =============================================================================
// Connection Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    connections: Vec<Arc<ArrayConnection>>,
    default: Option<Arc<ArrayConnection>>,
}

/// Registry of live array connections
pub struct ConnectionRegistry {
    /// Connections and default, guarded together so the default is always a member
    state: RwLock<RegistryState>,
    stats: RegistryStats,
    /// Event broadcaster
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(256);

        Arc::new(Self {
            state: RwLock::new(RegistryState::default()),
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Authenticate against `endpoint`, cache the array identity and register
    /// the resulting connection.
    pub async fn connect(
        &self,
        connector: &dyn ArrayConnector,
        endpoint: &str,
        credential: Credential,
        default: bool,
        non_default: bool,
    ) -> Result<Arc<ArrayConnection>> {
        // Reject contradictory switches before touching the network
        let role = RegistrationRole::from_flags(default, non_default)?;

        info!(endpoint = %endpoint, "Connecting to array");
        let api = connector.authenticate(endpoint, &credential).await?;
        let identity = api.get_array_identity().await?;

        let connection = ArrayConnection::new(endpoint, credential, identity, api);
        Ok(self.insert(connection, role))
    }

    /// Add an already-authenticated connection. Exactly one of `default` and
    /// `non_default` must be set.
    pub fn register(
        &self,
        connection: ArrayConnection,
        default: bool,
        non_default: bool,
    ) -> Result<Arc<ArrayConnection>> {
        let role = RegistrationRole::from_flags(default, non_default)?;
        Ok(self.insert(connection, role))
    }

    fn insert(&self, connection: ArrayConnection, role: RegistrationRole) -> Arc<ArrayConnection> {
        let connection = Arc::new(connection);
        let is_default = role == RegistrationRole::Default;

        {
            let mut state = self.state.write();
            state.connections.push(connection.clone());
            if is_default {
                state.default = Some(connection.clone());
            }
        }
        self.stats.registrations.fetch_add(1, Ordering::Relaxed);

        info!(
            endpoint = %connection.endpoint(),
            array_id = %connection.array_id(),
            array_name = %connection.identity().name,
            default = is_default,
            "Registered array connection"
        );

        let _ = self.event_sender.send(RegistryEvent::ConnectionRegistered {
            endpoint: connection.endpoint().to_string(),
            array_id: connection.array_id().to_string(),
            is_default,
        });
        if is_default {
            let _ = self.event_sender.send(RegistryEvent::DefaultChanged {
                endpoint: connection.endpoint().to_string(),
                array_id: connection.array_id().to_string(),
            });
        }

        connection
    }

    /// Remove every connection to `endpoint`. Clears the default if it was
    /// one of them.
    pub fn disconnect(&self, endpoint: &str) -> Result<Vec<Arc<ArrayConnection>>> {
        let (removed, was_default) = {
            let mut state = self.state.write();
            let (removed, kept): (Vec<_>, Vec<_>) = state
                .connections
                .drain(..)
                .partition(|c| c.endpoint().eq_ignore_ascii_case(endpoint));
            state.connections = kept;

            let was_default = state
                .default
                .as_ref()
                .map(|d| removed.iter().any(|r| Arc::ptr_eq(r, d)))
                .unwrap_or(false);
            if was_default {
                state.default = None;
            }
            (removed, was_default)
        };

        if removed.is_empty() {
            return Err(Error::not_found("ArrayConnection", endpoint));
        }

        self.stats
            .removals
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        for connection in &removed {
            info!(endpoint = %connection.endpoint(), "Disconnected array");
            let _ = self.event_sender.send(RegistryEvent::ConnectionRemoved {
                endpoint: connection.endpoint().to_string(),
                array_id: connection.array_id().to_string(),
                was_default,
            });
        }

        Ok(removed)
    }

    /// The default connection
    pub fn default_connection(&self) -> Result<Arc<ArrayConnection>> {
        self.state.read().default.clone().ok_or_else(|| {
            Error::NotConfigured(
                "no default array connection; register one as the default or pass an array explicitly"
                    .into(),
            )
        })
    }

    /// Every registered connection
    pub fn all(&self) -> Result<Vec<Arc<ArrayConnection>>> {
        let state = self.state.read();
        if state.connections.is_empty() {
            return Err(Error::NotConfigured(
                "no array connections have been registered".into(),
            ));
        }
        Ok(state.connections.clone())
    }

    /// First connection among `candidates` (or all registered connections)
    /// whose cached array serial equals `array_id`, ignoring case.
    pub fn resolve_by_id(
        &self,
        candidates: Option<&[Arc<ArrayConnection>]>,
        array_id: &str,
    ) -> Result<Arc<ArrayConnection>> {
        let all;
        let candidates = match candidates {
            Some(candidates) => candidates,
            None => {
                all = self.all()?;
                &all
            }
        };

        candidates
            .iter()
            .find(|c| c.matches_id(array_id))
            .cloned()
            .ok_or_else(|| Error::not_found("ArrayConnection", array_id))
    }

    pub fn len(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        let state = self.state.read();
        RegistryStatsSnapshot {
            connections: state.connections.len() as u64,
            has_default: state.default.is_some(),
            registrations: self.stats.registrations.load(Ordering::Relaxed),
            removals: self.stats.removals.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{SimulatedArray, SimulatedArrayConnector};
    use assert_matches::assert_matches;

    fn connection(endpoint: &str, array_id: &str) -> ArrayConnection {
        let array = SimulatedArray::new(array_id, format!("array-{}", endpoint));
        ArrayConnection::new(
            endpoint,
            Credential::new("pureuser", "pureuser"),
            array.identity().clone(),
            array,
        )
    }

    #[test]
    fn test_role_flags() {
        assert_eq!(
            RegistrationRole::from_flags(true, false).unwrap(),
            RegistrationRole::Default
        );
        assert_eq!(
            RegistrationRole::from_flags(false, true).unwrap(),
            RegistrationRole::NonDefault
        );
        assert_matches!(
            RegistrationRole::from_flags(true, true),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            RegistrationRole::from_flags(false, false),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_register_rejects_both_or_neither() {
        let registry = ConnectionRegistry::new();

        assert_matches!(
            registry.register(connection("10.0.0.5", "a1"), true, true),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            registry.register(connection("10.0.0.5", "a1"), false, false),
            Err(Error::Configuration(_))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_only_when_requested() {
        let registry = ConnectionRegistry::new();

        registry
            .register(connection("10.0.0.6", "a2"), false, true)
            .unwrap();
        assert_matches!(registry.default_connection(), Err(Error::NotConfigured(_)));

        registry
            .register(connection("10.0.0.5", "a1"), true, false)
            .unwrap();
        assert_eq!(registry.default_connection().unwrap().endpoint(), "10.0.0.5");
        assert_eq!(registry.all().unwrap().len(), 2);

        let stats = registry.stats();
        assert_eq!(stats.registrations, 2);
        assert!(stats.has_default);
    }

    #[test]
    fn test_empty_registry_not_configured() {
        let registry = ConnectionRegistry::new();
        assert_matches!(registry.all(), Err(Error::NotConfigured(_)));
        assert_matches!(
            registry.resolve_by_id(None, "a1"),
            Err(Error::NotConfigured(_))
        );
    }

    #[test]
    fn test_resolve_by_id_case_insensitive() {
        let registry = ConnectionRegistry::new();
        registry
            .register(connection("10.0.0.5", "2dcf29ad-6aca"), true, false)
            .unwrap();
        registry
            .register(connection("10.0.0.6", "77aa01ff-0000"), false, true)
            .unwrap();

        let found = registry.resolve_by_id(None, "77AA01FF-0000").unwrap();
        assert_eq!(found.endpoint(), "10.0.0.6");

        let only_first = vec![registry.default_connection().unwrap()];
        assert_matches!(
            registry.resolve_by_id(Some(&only_first), "77aa01ff-0000"),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn test_disconnect_clears_default() {
        let registry = ConnectionRegistry::new();
        let mut events = registry.subscribe();

        registry
            .register(connection("10.0.0.5", "a1"), true, false)
            .unwrap();
        registry.disconnect("10.0.0.5").unwrap();

        assert!(registry.is_empty());
        assert_matches!(registry.default_connection(), Err(Error::NotConfigured(_)));
        assert_matches!(
            registry.disconnect("10.0.0.5"),
            Err(Error::NotFound { .. })
        );

        assert_matches!(
            events.try_recv().unwrap(),
            RegistryEvent::ConnectionRegistered { is_default: true, .. }
        );
        assert_matches!(events.try_recv().unwrap(), RegistryEvent::DefaultChanged { .. });
        let removed = events.try_recv().unwrap();
        assert!(removed.affects_default());
    }

    #[tokio::test]
    async fn test_connect_caches_identity() {
        let array = SimulatedArray::new("2dcf29ad-6aca-4913-b62e-a15875c6635d", "flasharray-m20");
        let connector = SimulatedArrayConnector::new();
        connector.add_array("10.0.0.5", Credential::new("pureuser", "secret"), array);

        let registry = ConnectionRegistry::new();
        let conn = registry
            .connect(
                &connector,
                "10.0.0.5",
                Credential::new("pureuser", "secret"),
                true,
                false,
            )
            .await
            .unwrap();

        assert_eq!(conn.array_id(), "2dcf29ad-6aca-4913-b62e-a15875c6635d");
        assert_eq!(registry.default_connection().unwrap().endpoint(), "10.0.0.5");

        conn.refresh_credential(Credential::new("pureuser", "rotated"));
        assert_eq!(conn.credential().secret, "rotated");
    }

    #[tokio::test]
    async fn test_connect_validates_flags_before_authenticating() {
        let connector = SimulatedArrayConnector::new();
        let registry = ConnectionRegistry::new();

        // Unknown endpoint would fail authentication; flags are checked first
        let result = registry
            .connect(
                &connector,
                "10.9.9.9",
                Credential::new("pureuser", "secret"),
                true,
                true,
            )
            .await;
        assert_matches!(result, Err(Error::Configuration(_)));
    }
}
