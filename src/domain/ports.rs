//! Domain Ports - Collaborator traits and the shared data model
//!
//! These traits define the boundaries between the orchestration core and the
//! storage-array and compute control planes. Adapters implement these traits
//! to provide concrete functionality.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Credentials
// =============================================================================

/// Username/secret pair used to authenticate against an array or a host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Storage-Array Types
// =============================================================================

/// Identity reported by an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayIdentity {
    /// Array serial (the id embedded in VVol storage-array UUIDs)
    pub id: String,
    /// Array name
    pub name: String,
    /// Purity/API version string
    pub version: String,
}

/// A volume on an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    /// Volume serial, 24 hex characters on current arrays
    pub serial: String,
    pub size_bytes: u64,
}

/// A host object on an array
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageHost {
    pub name: String,
    pub iqns: Vec<String>,
    pub wwns: Vec<String>,
    /// Name of the host group this host belongs to, if any
    pub host_group: Option<String>,
}

/// Named collection of storage hosts on one array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHostGroup {
    pub name: String,
    pub hosts: Vec<String>,
}

/// Initiators a new storage host is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostInitiators {
    Iscsi(Vec<String>),
    FibreChannel(Vec<String>),
}

/// A data-plane network interface on an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    /// Service carried by the interface (`iscsi`, `management`, `replication`...)
    pub service: String,
    pub enabled: bool,
    pub address: Option<String>,
}

/// Block protocol used to attach compute hosts to an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    FibreChannel,
    Iscsi,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::FibreChannel => write!(f, "fc"),
            Protocol::Iscsi => write!(f, "iscsi"),
        }
    }
}

// =============================================================================
// Compute Types
// =============================================================================

/// Handle to an open session against one compute host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeSession {
    pub id: u64,
    pub address: String,
}

/// Identity of a hypervisor host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComputeHost {
    pub name: String,
    #[serde(default)]
    pub iqns: Vec<String>,
    /// Fibre Channel port WWNs, 16 hex characters each
    #[serde(default)]
    pub wwns: Vec<String>,
}

/// Host bus adapter class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HbaKind {
    FibreChannel,
    Iscsi,
}

/// A host bus adapter as reported by the compute side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hba {
    /// Device name, e.g. `vmhba2`
    pub device: String,
    /// Port WWN as unseparated hex (FC) or initiator IQN (iSCSI)
    pub identifier: String,
}

/// Datastore kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    Vmfs,
    Vvol,
    Nfs,
    Other,
}

impl std::fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatastoreKind::Vmfs => write!(f, "VMFS"),
            DatastoreKind::Vvol => write!(f, "VVOL"),
            DatastoreKind::Nfs => write!(f, "NFS"),
            DatastoreKind::Other => write!(f, "other"),
        }
    }
}

/// What backs a datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatastoreBacking {
    /// Block datastore on a single extent
    Vmfs { disk_name: String },
    /// VVol container; the UUID embeds the owning array's id
    Vvol { storage_array_uuid: String },
    Nfs { remote_host: String, remote_path: String },
    Other { type_name: String },
}

/// Compute-side storage abstraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub backing: DatastoreBacking,
}

impl Datastore {
    pub fn vmfs(name: impl Into<String>, disk_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backing: DatastoreBacking::Vmfs {
                disk_name: disk_name.into(),
            },
        }
    }

    pub fn vvol(name: impl Into<String>, storage_array_uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backing: DatastoreBacking::Vvol {
                storage_array_uuid: storage_array_uuid.into(),
            },
        }
    }

    pub fn kind(&self) -> DatastoreKind {
        match self.backing {
            DatastoreBacking::Vmfs { .. } => DatastoreKind::Vmfs,
            DatastoreBacking::Vvol { .. } => DatastoreKind::Vvol,
            DatastoreBacking::Nfs { .. } => DatastoreKind::Nfs,
            DatastoreBacking::Other { .. } => DatastoreKind::Other,
        }
    }
}

/// Where to look for datastores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreScope {
    All,
    Host(String),
    Cluster(String),
}

// =============================================================================
// Storage-Array Ports
// =============================================================================

/// Port for establishing authenticated array sessions
#[async_trait]
pub trait ArrayConnector: Send + Sync {
    /// Authenticate against an array endpoint
    async fn authenticate(&self, endpoint: &str, credential: &Credential)
        -> Result<StorageArrayRef>;
}

/// Port for control-plane operations on one authenticated array session
#[async_trait]
pub trait StorageArrayApi: Send + Sync {
    async fn get_array_identity(&self) -> Result<ArrayIdentity>;

    async fn list_volumes(&self) -> Result<Vec<Volume>>;

    async fn list_hosts(&self) -> Result<Vec<StorageHost>>;

    async fn create_host(&self, name: &str, initiators: &HostInitiators) -> Result<StorageHost>;

    async fn delete_host(&self, name: &str) -> Result<()>;

    async fn create_host_group(
        &self,
        name: &str,
        host_names: &[String],
    ) -> Result<StorageHostGroup>;

    async fn get_host_group(&self, name: &str) -> Result<StorageHostGroup>;

    async fn delete_host_group(&self, name: &str) -> Result<()>;

    async fn add_hosts_to_group(&self, group: &str, host_names: &[String]) -> Result<()>;

    async fn create_volume(&self, name: &str, size_bytes: u64) -> Result<Volume>;

    /// Destroy a volume; with `eradicate` the destroyed volume is purged
    async fn delete_volume(&self, name: &str, eradicate: bool) -> Result<()>;

    async fn connect_volume_to_group(&self, volume: &str, group: &str) -> Result<()>;

    async fn disconnect_volume_from_group(&self, volume: &str, group: &str) -> Result<()>;

    async fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>>;
}

// =============================================================================
// Compute Port
// =============================================================================

/// Port for compute/virtualization control-plane operations
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn open_session(&self, address: &str, credential: &Credential)
        -> Result<ComputeSession>;

    async fn close_session(&self, session: &ComputeSession) -> Result<()>;

    async fn get_host(&self, session: &ComputeSession) -> Result<ComputeHost>;

    async fn list_hbas(&self, host: &ComputeHost, kind: HbaKind) -> Result<Vec<Hba>>;

    async fn enable_software_iscsi(&self, host: &ComputeHost) -> Result<()>;

    async fn add_iscsi_target(&self, host: &ComputeHost, hba_device: &str, address: &str)
        -> Result<()>;

    async fn set_iscsi_parameter(
        &self,
        host: &ComputeHost,
        hba_device: &str,
        address: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    async fn rescan_storage(&self, host: &ComputeHost) -> Result<()>;

    async fn create_vmfs_datastore(
        &self,
        host: &ComputeHost,
        name: &str,
        disk_path: &str,
    ) -> Result<Datastore>;

    async fn list_cluster_hosts(&self, cluster: &str) -> Result<Vec<ComputeHost>>;

    async fn get_datastores(&self, scope: &DatastoreScope) -> Result<Vec<Datastore>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ArrayConnectorRef = Arc<dyn ArrayConnector>;
pub type StorageArrayRef = Arc<dyn StorageArrayApi>;
pub type ComputeApiRef = Arc<dyn ComputeApi>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datastore_kind() {
        assert_eq!(Datastore::vmfs("ds1", "naa.624a9370aa").kind(), DatastoreKind::Vmfs);
        assert_eq!(Datastore::vvol("vv1", "com.purestorage:abc").kind(), DatastoreKind::Vvol);
        assert_eq!(format!("{}", DatastoreKind::Vvol), "VVOL");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::new("pureuser", "hunter2");
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("pureuser"));
        assert!(!rendered.contains("hunter2"));
    }
}
