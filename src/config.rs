//! Orchestrator configuration
//!
//! Tunables for remote calls and provisioning, plus the lab inventory used to
//! seed simulated arrays and hosts. Both load from YAML; every field has a
//! default so partial files are accepted.

use crate::domain::ports::{
    ComputeHost, Credential, Datastore, NetworkInterface, StorageHost, Volume,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for correlation and provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on every remote call, in seconds
    pub call_timeout_secs: u64,
    /// Prefix for host groups created by workload-domain initialization
    pub host_group_prefix: String,
    /// iSCSI target settings
    pub iscsi: IscsiConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            host_group_prefix: "WorkloadDomain-".to_string(),
            iscsi: IscsiConfig::default(),
        }
    }
}

/// iSCSI send-target parameters applied by target configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiConfig {
    pub login_timeout_secs: u32,
    pub delayed_ack: bool,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: 30,
            delayed_ack: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_secs == 0 {
            return Err(Error::Configuration(
                "call_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.host_group_prefix.trim().is_empty() {
            return Err(Error::Configuration("host_group_prefix must not be empty".into()));
        }
        if self.iscsi.login_timeout_secs == 0 {
            return Err(Error::Configuration(
                "iscsi.login_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

// =============================================================================
// Lab Inventory
// =============================================================================

/// Simulated estate: arrays and compute hosts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabInventory {
    pub arrays: Vec<ArraySeed>,
    pub compute: ComputeSeed,
}

/// One simulated array and how to register it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArraySeed {
    pub endpoint: String,
    pub id: String,
    pub name: String,
    pub credential: Credential,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub hosts: Vec<StorageHost>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSeed {
    pub credential: Option<Credential>,
    pub hosts: Vec<ComputeHostSeed>,
    pub datastores: Vec<DatastoreSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeHostSeed {
    pub address: String,
    #[serde(flatten)]
    pub host: ComputeHost,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreSeed {
    /// Name of the host the datastore is mounted on
    pub host: String,
    #[serde(flatten)]
    pub datastore: Datastore,
}

impl LabInventory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::DatastoreKind;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.host_group_prefix, "WorkloadDomain-");
        assert_eq!(config.iscsi.login_timeout_secs, 30);
        assert!(!config.iscsi.delayed_ack);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = OrchestratorConfig::from_yaml("call_timeout_secs: 15\n").unwrap();
        assert_eq!(config.call_timeout_secs, 15);
        assert_eq!(config.host_group_prefix, "WorkloadDomain-");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert_matches!(
            OrchestratorConfig::from_yaml("call_timeout_secs: 0\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            OrchestratorConfig::from_yaml("call_timeout_secs: [1, 2]\n"),
            Err(Error::Yaml(_))
        );
    }

    #[test]
    fn test_load_inventory_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
arrays:
  - endpoint: 10.0.0.5
    id: 2dcf29ad-6aca-4913-b62e-a15875c6635d
    name: flasharray-m20
    credential: {{ username: pureuser, secret: pureuser }}
    default: true
    volumes:
      - {{ name: ds-gold, serial: 2DCF29AD6ACA000000000001, size_bytes: 1099511627776 }}
compute:
  hosts:
    - address: 10.1.1.11
      name: esxi-01.lab.local
      wwns: [2100001b32a0c1d2]
      cluster: wd-cluster
    - address: 10.1.1.12
      name: esxi-02.lab.local
      iqns: [iqn.1998-01.com.vmware:esxi-02]
  datastores:
    - host: esxi-01.lab.local
      name: ds-gold
      backing: {{ kind: vmfs, disk_name: naa.624a93702dcf29ad6aca000000000001 }}
"#
        )
        .unwrap();

        let inventory = LabInventory::load(file.path()).unwrap();
        assert_eq!(inventory.arrays.len(), 1);
        assert!(inventory.arrays[0].default);
        assert_eq!(inventory.compute.hosts[0].cluster.as_deref(), Some("wd-cluster"));
        assert!(inventory.compute.hosts[0].host.iqns.is_empty());
        assert!(inventory.compute.hosts[1].host.wwns.is_empty());
        assert_eq!(inventory.compute.hosts[1].cluster, None);
        assert_eq!(inventory.compute.datastores[0].datastore.kind(), DatastoreKind::Vmfs);
    }
}
