//! Simulated Compute Platform
//!
//! In-memory hypervisor inventory: hosts reachable by address, their HBAs,
//! cluster membership and datastores. Tracks open sessions so callers can
//! verify that every session they opened was closed.

use crate::domain::ports::{
    ComputeApi, ComputeHost, ComputeSession, Credential, Datastore, DatastoreScope, Hba, HbaKind,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SYSTEM: &str = "simulated-compute";

/// Device name given to the software iSCSI adapter once enabled
pub const SOFTWARE_ISCSI_DEVICE: &str = "vmhba64";

// =============================================================================
// Host State
// =============================================================================

#[derive(Debug, Clone)]
struct HostState {
    host: ComputeHost,
    cluster: Option<String>,
    fc_hbas: Vec<Hba>,
    software_iscsi: Option<Hba>,
    iscsi_targets: Vec<(String, String)>,
    iscsi_params: BTreeMap<(String, String), String>,
    rescans: u32,
}

#[derive(Debug, Clone)]
struct DatastoreRecord {
    datastore: Datastore,
    host: String,
}

#[derive(Debug, Default)]
struct ComputeState {
    /// Hosts keyed by management address
    hosts: BTreeMap<String, HostState>,
    /// Open sessions: id -> address
    sessions: HashMap<u64, String>,
    next_session: u64,
    sessions_opened: u64,
    datastores: Vec<DatastoreRecord>,
}

impl ComputeState {
    fn host_by_name(&self, name: &str) -> Result<&HostState> {
        self.hosts
            .values()
            .find(|h| h.host.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::not_found("ComputeHost", name))
    }

    fn host_by_name_mut(&mut self, name: &str) -> Result<&mut HostState> {
        self.hosts
            .values_mut()
            .find(|h| h.host.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::not_found("ComputeHost", name))
    }
}

// =============================================================================
// Simulated Compute
// =============================================================================

/// In-memory compute platform
#[derive(Default)]
pub struct SimulatedCompute {
    state: Mutex<ComputeState>,
    failures: Mutex<HashSet<String>>,
    stalls: Mutex<HashSet<String>>,
    on_datastore_created: Mutex<Option<CancellationToken>>,
}

impl SimulatedCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `operation` fail until cleared
    pub fn fail_on(&self, operation: &str) {
        self.failures.lock().insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Make every subsequent call to `operation` hang forever
    pub fn stall_on(&self, operation: &str) {
        self.stalls.lock().insert(operation.to_string());
    }

    /// Cancel `token` as soon as a datastore create succeeds
    pub fn cancel_on_datastore_created(&self, token: CancellationToken) {
        *self.on_datastore_created.lock() = Some(token);
    }

    async fn gate(&self, operation: &str) -> Result<()> {
        let stalled = self.stalls.lock().contains(operation);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.check(operation)
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failures.lock().contains(operation) {
            return Err(Error::remote(SYSTEM, operation, "injected failure"));
        }
        Ok(())
    }

    /// Seed a host reachable at `address`. Its WWNs become FC HBAs.
    pub fn add_host(&self, address: &str, host: ComputeHost, cluster: Option<&str>) {
        let fc_hbas = host
            .wwns
            .iter()
            .enumerate()
            .map(|(i, wwn)| Hba {
                device: format!("vmhba{}", i + 2),
                identifier: wwn.clone(),
            })
            .collect();

        self.state.lock().hosts.insert(
            address.to_string(),
            HostState {
                host,
                cluster: cluster.map(str::to_string),
                fc_hbas,
                software_iscsi: None,
                iscsi_targets: Vec::new(),
                iscsi_params: BTreeMap::new(),
                rescans: 0,
            },
        );
    }

    /// Seed a datastore mounted on `host_name`
    pub fn add_datastore(&self, host_name: &str, datastore: Datastore) {
        self.state.lock().datastores.push(DatastoreRecord {
            datastore,
            host: host_name.to_string(),
        });
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn open_session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().sessions_opened
    }

    pub fn rescan_count(&self, host_name: &str) -> u32 {
        self.state
            .lock()
            .host_by_name(host_name)
            .map(|h| h.rescans)
            .unwrap_or(0)
    }

    pub fn iscsi_targets(&self, host_name: &str) -> Vec<String> {
        self.state
            .lock()
            .host_by_name(host_name)
            .map(|h| h.iscsi_targets.iter().map(|(_, a)| a.clone()).collect())
            .unwrap_or_default()
    }

    pub fn iscsi_parameter(&self, host_name: &str, address: &str, key: &str) -> Option<String> {
        let state = self.state.lock();
        let host = state.host_by_name(host_name).ok()?;
        host.iscsi_params
            .get(&(address.to_string(), key.to_string()))
            .cloned()
    }

    pub fn datastore_names(&self) -> Vec<String> {
        self.state
            .lock()
            .datastores
            .iter()
            .map(|r| r.datastore.name.clone())
            .collect()
    }
}

#[async_trait]
impl ComputeApi for SimulatedCompute {
    async fn open_session(
        &self,
        address: &str,
        _credential: &Credential,
    ) -> Result<ComputeSession> {
        self.gate("open_session").await?;
        let mut state = self.state.lock();

        if !state.hosts.contains_key(address) {
            return Err(Error::remote(
                SYSTEM,
                "open_session",
                format!("{} unreachable", address),
            ));
        }
        state.next_session += 1;
        state.sessions_opened += 1;
        let id = state.next_session;
        state.sessions.insert(id, address.to_string());
        debug!(session = id, address = %address, "Opened compute session");

        Ok(ComputeSession {
            id,
            address: address.to_string(),
        })
    }

    async fn close_session(&self, session: &ComputeSession) -> Result<()> {
        self.gate("close_session").await?;
        self.state
            .lock()
            .sessions
            .remove(&session.id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("ComputeSession", session.id.to_string()))
    }

    async fn get_host(&self, session: &ComputeSession) -> Result<ComputeHost> {
        self.gate("get_host").await?;
        let state = self.state.lock();
        let address = state
            .sessions
            .get(&session.id)
            .ok_or_else(|| Error::not_found("ComputeSession", session.id.to_string()))?;
        state
            .hosts
            .get(address)
            .map(|h| h.host.clone())
            .ok_or_else(|| Error::not_found("ComputeHost", address.clone()))
    }

    async fn list_hbas(&self, host: &ComputeHost, kind: HbaKind) -> Result<Vec<Hba>> {
        self.gate("list_hbas").await?;
        let state = self.state.lock();
        let host = state.host_by_name(&host.name)?;
        Ok(match kind {
            HbaKind::FibreChannel => host.fc_hbas.clone(),
            HbaKind::Iscsi => host.software_iscsi.iter().cloned().collect(),
        })
    }

    async fn enable_software_iscsi(&self, host: &ComputeHost) -> Result<()> {
        self.gate("enable_software_iscsi").await?;
        let mut state = self.state.lock();
        let host = state.host_by_name_mut(&host.name)?;
        if host.software_iscsi.is_none() {
            let iqn = host.host.iqns.first().cloned().unwrap_or_else(|| {
                format!("iqn.1998-01.com.vmware:{}", host.host.name.to_ascii_lowercase())
            });
            if host.host.iqns.is_empty() {
                host.host.iqns.push(iqn.clone());
            }
            host.software_iscsi = Some(Hba {
                device: SOFTWARE_ISCSI_DEVICE.to_string(),
                identifier: iqn,
            });
        }
        Ok(())
    }

    async fn add_iscsi_target(
        &self,
        host: &ComputeHost,
        hba_device: &str,
        address: &str,
    ) -> Result<()> {
        self.gate("add_iscsi_target").await?;
        let mut state = self.state.lock();
        let host = state.host_by_name_mut(&host.name)?;
        let target = (hba_device.to_string(), address.to_string());
        if !host.iscsi_targets.contains(&target) {
            host.iscsi_targets.push(target);
        }
        Ok(())
    }

    async fn set_iscsi_parameter(
        &self,
        host: &ComputeHost,
        _hba_device: &str,
        address: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.gate("set_iscsi_parameter").await?;
        let mut state = self.state.lock();
        let host = state.host_by_name_mut(&host.name)?;
        host.iscsi_params
            .insert((address.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn rescan_storage(&self, host: &ComputeHost) -> Result<()> {
        self.gate("rescan_storage").await?;
        let mut state = self.state.lock();
        state.host_by_name_mut(&host.name)?.rescans += 1;
        Ok(())
    }

    async fn create_vmfs_datastore(
        &self,
        host: &ComputeHost,
        name: &str,
        disk_path: &str,
    ) -> Result<Datastore> {
        self.gate("create_vmfs_datastore").await?;
        let mut state = self.state.lock();

        if state.host_by_name(&host.name)?.rescans == 0 {
            return Err(Error::remote(
                SYSTEM,
                "create_vmfs_datastore",
                format!("disk {} not visible on {}", disk_path, host.name),
            ));
        }
        if state.datastores.iter().any(|r| r.datastore.name == name) {
            return Err(Error::remote(
                SYSTEM,
                "create_vmfs_datastore",
                format!("datastore {} already exists", name),
            ));
        }

        let datastore = Datastore::vmfs(name, disk_path);
        state.datastores.push(DatastoreRecord {
            datastore: datastore.clone(),
            host: host.name.clone(),
        });
        drop(state);
        if let Some(token) = self.on_datastore_created.lock().take() {
            token.cancel();
        }
        Ok(datastore)
    }

    async fn list_cluster_hosts(&self, cluster: &str) -> Result<Vec<ComputeHost>> {
        self.gate("list_cluster_hosts").await?;
        let hosts: Vec<ComputeHost> = self
            .state
            .lock()
            .hosts
            .values()
            .filter(|h| h.cluster.as_deref() == Some(cluster))
            .map(|h| h.host.clone())
            .collect();

        if hosts.is_empty() {
            return Err(Error::not_found("Cluster", cluster));
        }
        Ok(hosts)
    }

    async fn get_datastores(&self, scope: &DatastoreScope) -> Result<Vec<Datastore>> {
        self.gate("get_datastores").await?;
        let state = self.state.lock();

        let in_scope = |record: &DatastoreRecord| match scope {
            DatastoreScope::All => true,
            DatastoreScope::Host(name) => record.host.eq_ignore_ascii_case(name),
            DatastoreScope::Cluster(cluster) => state
                .host_by_name(&record.host)
                .map(|h| h.cluster.as_deref() == Some(cluster.as_str()))
                .unwrap_or(false),
        };

        Ok(state
            .datastores
            .iter()
            .filter(|&r| in_scope(r))
            .map(|r| r.datastore.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn esxi(name: &str, wwns: &[&str]) -> ComputeHost {
        ComputeHost {
            name: name.to_string(),
            iqns: Vec::new(),
            wwns: wwns.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_tracked() {
        let compute = SimulatedCompute::new();
        compute.add_host("10.1.1.11", esxi("esxi-01", &["2100001b32a0c1d2"]), Some("wd"));
        let cred = Credential::new("root", "vmware");

        let session = compute.open_session("10.1.1.11", &cred).await.unwrap();
        assert_eq!(compute.open_session_count(), 1);
        let host = compute.get_host(&session).await.unwrap();
        assert_eq!(host.name, "esxi-01");

        let hbas = compute.list_hbas(&host, HbaKind::FibreChannel).await.unwrap();
        assert_eq!(hbas[0].identifier, "2100001b32a0c1d2");

        compute.close_session(&session).await.unwrap();
        assert_eq!(compute.open_session_count(), 0);
        assert_matches!(
            compute.open_session("10.9.9.9", &cred).await,
            Err(Error::RemoteOperation { .. })
        );
    }

    #[tokio::test]
    async fn test_datastore_requires_rescan() {
        let compute = SimulatedCompute::new();
        compute.add_host("10.1.1.11", esxi("esxi-01", &[]), Some("wd"));
        let host = esxi("esxi-01", &[]);

        assert_matches!(
            compute.create_vmfs_datastore(&host, "ds1", "naa.624a9370aa").await,
            Err(Error::RemoteOperation { .. })
        );
        compute.rescan_storage(&host).await.unwrap();
        compute
            .create_vmfs_datastore(&host, "ds1", "naa.624a9370aa")
            .await
            .unwrap();

        let in_cluster = compute
            .get_datastores(&DatastoreScope::Cluster("wd".into()))
            .await
            .unwrap();
        assert_eq!(in_cluster.len(), 1);
    }
}
