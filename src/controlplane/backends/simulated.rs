//! Simulated Storage Array
//!
//! In-memory array control plane that enforces the same referential rules a
//! real array does (connected volumes cannot be destroyed, populated host
//! groups cannot be deleted, initiators belong to one host). Used for lab
//! runs and tests; individual operations can be made to fail on demand.

use crate::domain::ports::{
    ArrayConnector, ArrayIdentity, Credential, HostInitiators, NetworkInterface, StorageArrayApi,
    StorageArrayRef, StorageHost, StorageHostGroup, Volume,
};
use crate::correlation::identifiers::{iqn_eq, wwn_eq};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const SYSTEM: &str = "simulated-array";

// =============================================================================
// Array State
// =============================================================================

#[derive(Debug, Default)]
struct ArrayState {
    volumes: BTreeMap<String, Volume>,
    /// Destroyed but not yet eradicated
    destroyed: BTreeMap<String, Volume>,
    hosts: BTreeMap<String, StorageHost>,
    groups: BTreeMap<String, StorageHostGroup>,
    /// (volume, host group)
    connections: BTreeSet<(String, String)>,
    interfaces: Vec<NetworkInterface>,
    next_volume: u64,
}

// =============================================================================
// Simulated Array
// =============================================================================

/// In-memory array
pub struct SimulatedArray {
    identity: ArrayIdentity,
    /// First half of every volume serial this array hands out
    serial_prefix: String,
    state: Mutex<ArrayState>,
    /// Operations that fail on their next invocations
    failures: Mutex<HashSet<String>>,
}

impl SimulatedArray {
    /// Create a new simulated array
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        let id = id.into();
        let mut serial_prefix: String = id
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(12)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        while serial_prefix.len() < 12 {
            serial_prefix.push('0');
        }

        Arc::new(Self {
            identity: ArrayIdentity {
                id,
                name: name.into(),
                version: "6.5.0".to_string(),
            },
            serial_prefix,
            state: Mutex::new(ArrayState::default()),
            failures: Mutex::new(HashSet::new()),
        })
    }

    pub fn identity(&self) -> &ArrayIdentity {
        &self.identity
    }

    /// Make every subsequent call to `operation` fail until cleared
    pub fn fail_on(&self, operation: &str) {
        self.failures.lock().insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failures.lock().contains(operation) {
            return Err(Error::remote(SYSTEM, operation, "injected failure"));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Seed a volume with a fixed serial
    pub fn add_volume(&self, name: &str, serial: &str, size_bytes: u64) {
        self.state.lock().volumes.insert(
            name.to_string(),
            Volume {
                name: name.to_string(),
                serial: serial.to_string(),
                size_bytes,
            },
        );
    }

    /// Seed a host, creating its host group if it names one
    pub fn add_host(&self, host: StorageHost) {
        let mut state = self.state.lock();
        if let Some(group) = &host.host_group {
            state
                .groups
                .entry(group.clone())
                .or_insert_with(|| StorageHostGroup {
                    name: group.clone(),
                    hosts: Vec::new(),
                })
                .hosts
                .push(host.name.clone());
        }
        state.hosts.insert(host.name.clone(), host);
    }

    pub fn add_network_interface(&self, interface: NetworkInterface) {
        self.state.lock().interfaces.push(interface);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn volumes(&self) -> Vec<Volume> {
        self.state.lock().volumes.values().cloned().collect()
    }

    pub fn destroyed_volumes(&self) -> Vec<Volume> {
        self.state.lock().destroyed.values().cloned().collect()
    }

    pub fn hosts(&self) -> Vec<StorageHost> {
        self.state.lock().hosts.values().cloned().collect()
    }

    pub fn host_groups(&self) -> Vec<StorageHostGroup> {
        self.state.lock().groups.values().cloned().collect()
    }

    pub fn volume_connections(&self) -> Vec<(String, String)> {
        self.state.lock().connections.iter().cloned().collect()
    }
}

#[async_trait]
impl StorageArrayApi for SimulatedArray {
    async fn get_array_identity(&self) -> Result<ArrayIdentity> {
        self.check("get_array_identity")?;
        Ok(self.identity.clone())
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.check("list_volumes")?;
        Ok(self.volumes())
    }

    async fn list_hosts(&self) -> Result<Vec<StorageHost>> {
        self.check("list_hosts")?;
        Ok(self.hosts())
    }

    async fn create_host(&self, name: &str, initiators: &HostInitiators) -> Result<StorageHost> {
        self.check("create_host")?;
        let mut state = self.state.lock();

        if state.hosts.contains_key(name) {
            return Err(Error::remote(SYSTEM, "create_host", format!("host {} already exists", name)));
        }

        let (iqns, wwns) = match initiators {
            HostInitiators::Iscsi(iqns) => (iqns.clone(), Vec::new()),
            HostInitiators::FibreChannel(wwns) => (Vec::new(), wwns.clone()),
        };

        let taken = state.hosts.values().find(|h| {
            iqns.iter().any(|i| h.iqns.iter().any(|x| iqn_eq(i, x)))
                || wwns.iter().any(|w| h.wwns.iter().any(|x| wwn_eq(w, x)))
        });
        if let Some(owner) = taken {
            return Err(Error::remote(
                SYSTEM,
                "create_host",
                format!("initiator already in use by host {}", owner.name),
            ));
        }

        let host = StorageHost {
            name: name.to_string(),
            iqns,
            wwns,
            host_group: None,
        };
        state.hosts.insert(name.to_string(), host.clone());
        debug!(array = %self.identity.name, host = %name, "Created host");
        Ok(host)
    }

    async fn delete_host(&self, name: &str) -> Result<()> {
        self.check("delete_host")?;
        let mut state = self.state.lock();

        let host = state
            .hosts
            .remove(name)
            .ok_or_else(|| Error::not_found("StorageHost", name))?;
        if let Some(group) = host.host_group.and_then(|g| state.groups.get_mut(&g)) {
            group.hosts.retain(|h| h != name);
        }
        Ok(())
    }

    async fn create_host_group(
        &self,
        name: &str,
        host_names: &[String],
    ) -> Result<StorageHostGroup> {
        self.check("create_host_group")?;
        let mut state = self.state.lock();

        if state.groups.contains_key(name) {
            return Err(Error::remote(
                SYSTEM,
                "create_host_group",
                format!("host group {} already exists", name),
            ));
        }
        for host_name in host_names {
            match state.hosts.get(host_name) {
                None => return Err(Error::not_found("StorageHost", host_name)),
                Some(StorageHost {
                    host_group: Some(existing),
                    ..
                }) => {
                    return Err(Error::remote(
                        SYSTEM,
                        "create_host_group",
                        format!("host {} already belongs to {}", host_name, existing),
                    ))
                }
                Some(_) => {}
            }
        }

        for host_name in host_names {
            if let Some(host) = state.hosts.get_mut(host_name) {
                host.host_group = Some(name.to_string());
            }
        }
        let group = StorageHostGroup {
            name: name.to_string(),
            hosts: host_names.to_vec(),
        };
        state.groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    async fn get_host_group(&self, name: &str) -> Result<StorageHostGroup> {
        self.check("get_host_group")?;
        self.state
            .lock()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("StorageHostGroup", name))
    }

    async fn delete_host_group(&self, name: &str) -> Result<()> {
        self.check("delete_host_group")?;
        let mut state = self.state.lock();

        let group = state
            .groups
            .get(name)
            .ok_or_else(|| Error::not_found("StorageHostGroup", name))?;
        if !group.hosts.is_empty() {
            return Err(Error::remote(
                SYSTEM,
                "delete_host_group",
                format!("host group {} still has {} hosts", name, group.hosts.len()),
            ));
        }
        if state.connections.iter().any(|(_, g)| g == name) {
            return Err(Error::remote(
                SYSTEM,
                "delete_host_group",
                format!("host group {} still has connected volumes", name),
            ));
        }
        state.groups.remove(name);
        Ok(())
    }

    async fn add_hosts_to_group(&self, group: &str, host_names: &[String]) -> Result<()> {
        self.check("add_hosts_to_group")?;
        let mut state = self.state.lock();

        if !state.groups.contains_key(group) {
            return Err(Error::not_found("StorageHostGroup", group));
        }
        for host_name in host_names {
            let host = state
                .hosts
                .get(host_name)
                .ok_or_else(|| Error::not_found("StorageHost", host_name))?;
            if let Some(existing) = host.host_group.as_deref().filter(|g| *g != group) {
                return Err(Error::remote(
                    SYSTEM,
                    "add_hosts_to_group",
                    format!("host {} already belongs to {}", host_name, existing),
                ));
            }
        }

        for host_name in host_names {
            if let Some(host) = state.hosts.get_mut(host_name) {
                host.host_group = Some(group.to_string());
            }
            if let Some(g) = state.groups.get_mut(group) {
                if !g.hosts.contains(host_name) {
                    g.hosts.push(host_name.clone());
                }
            }
        }
        Ok(())
    }

    async fn create_volume(&self, name: &str, size_bytes: u64) -> Result<Volume> {
        self.check("create_volume")?;
        let mut state = self.state.lock();

        if state.volumes.contains_key(name) || state.destroyed.contains_key(name) {
            return Err(Error::remote(
                SYSTEM,
                "create_volume",
                format!("volume {} already exists", name),
            ));
        }

        state.next_volume += 1;
        let volume = Volume {
            name: name.to_string(),
            serial: format!("{}{:012X}", self.serial_prefix, state.next_volume),
            size_bytes,
        };
        state.volumes.insert(name.to_string(), volume.clone());
        debug!(array = %self.identity.name, volume = %name, serial = %volume.serial, "Created volume");
        Ok(volume)
    }

    async fn delete_volume(&self, name: &str, eradicate: bool) -> Result<()> {
        self.check("delete_volume")?;
        let mut state = self.state.lock();

        if eradicate {
            return state
                .destroyed
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| Error::not_found("DestroyedVolume", name));
        }

        if state.connections.iter().any(|(v, _)| v == name) {
            return Err(Error::remote(
                SYSTEM,
                "delete_volume",
                format!("volume {} is still connected", name),
            ));
        }
        let volume = state
            .volumes
            .remove(name)
            .ok_or_else(|| Error::not_found("Volume", name))?;
        state.destroyed.insert(name.to_string(), volume);
        Ok(())
    }

    async fn connect_volume_to_group(&self, volume: &str, group: &str) -> Result<()> {
        self.check("connect_volume_to_group")?;
        let mut state = self.state.lock();

        if !state.volumes.contains_key(volume) {
            return Err(Error::not_found("Volume", volume));
        }
        if !state.groups.contains_key(group) {
            return Err(Error::not_found("StorageHostGroup", group));
        }
        if !state.connections.insert((volume.to_string(), group.to_string())) {
            return Err(Error::remote(
                SYSTEM,
                "connect_volume_to_group",
                format!("volume {} already connected to {}", volume, group),
            ));
        }
        Ok(())
    }

    async fn disconnect_volume_from_group(&self, volume: &str, group: &str) -> Result<()> {
        self.check("disconnect_volume_from_group")?;
        let key = (volume.to_string(), group.to_string());
        if self.state.lock().connections.remove(&key) {
            Ok(())
        } else {
            Err(Error::not_found(
                "VolumeConnection",
                format!("{}/{}", volume, group),
            ))
        }
    }

    async fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>> {
        self.check("list_network_interfaces")?;
        Ok(self.state.lock().interfaces.clone())
    }
}

// =============================================================================
// Simulated Connector
// =============================================================================

/// Authenticates against registered simulated arrays by endpoint
#[derive(Default)]
pub struct SimulatedArrayConnector {
    arrays: Mutex<HashMap<String, (Credential, Arc<SimulatedArray>)>>,
}

impl SimulatedArrayConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `array` at `endpoint`, accepting only `credential`
    pub fn add_array(&self, endpoint: &str, credential: Credential, array: Arc<SimulatedArray>) {
        self.arrays
            .lock()
            .insert(endpoint.to_ascii_lowercase(), (credential, array));
    }
}

#[async_trait]
impl ArrayConnector for SimulatedArrayConnector {
    async fn authenticate(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<StorageArrayRef> {
        let arrays = self.arrays.lock();
        let (expected, array) = arrays
            .get(&endpoint.to_ascii_lowercase())
            .ok_or_else(|| Error::remote(SYSTEM, "authenticate", format!("{} unreachable", endpoint)))?;

        if expected != credential {
            return Err(Error::remote(SYSTEM, "authenticate", "invalid credentials"));
        }
        let api: StorageArrayRef = array.clone();
        Ok(api)
    }
}
