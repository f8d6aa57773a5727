//! Host Provisioning
//!
//! Creates storage-side hosts and host groups from compute-side identities and
//! wires software iSCSI to an array's data interfaces.

use crate::config::IscsiConfig;
use crate::controlplane::guard::CallGuard;
use crate::controlplane::ledger::{RollbackLedger, UndoAction};
use crate::correlation::correlator::ResourceCorrelator;
use crate::correlation::identifiers::{split_wwns, storage_host_name};
use crate::domain::ports::{
    ComputeApiRef, ComputeHost, HbaKind, HostInitiators, Protocol, StorageHost, StorageHostGroup,
};
use crate::error::{Error, Result};
use crate::registry::ArrayConnection;
use tracing::{debug, info, warn};

/// iSCSI send-target parameter keys
pub const DELAYED_ACK_KEY: &str = "DelayedAck";
pub const LOGIN_TIMEOUT_KEY: &str = "LoginTimeout";

/// Network interface service carrying iSCSI traffic
const ISCSI_SERVICE: &str = "iscsi";

/// Provisions storage hosts for compute hosts
#[derive(Clone)]
pub struct HostProvisioner {
    compute: ComputeApiRef,
    correlator: ResourceCorrelator,
    guard: CallGuard,
    iscsi: IscsiConfig,
}

impl HostProvisioner {
    pub fn new(compute: ComputeApiRef, guard: CallGuard, iscsi: IscsiConfig) -> Self {
        let correlator = ResourceCorrelator::new(compute.clone(), guard.clone());
        Self {
            compute,
            correlator,
            guard,
            iscsi,
        }
    }

    pub fn correlator(&self) -> &ResourceCorrelator {
        &self.correlator
    }

    /// Storage host already defined for `host`, if any
    pub async fn existing_storage_host(
        &self,
        host: &ComputeHost,
        connection: &ArrayConnection,
    ) -> Result<Option<StorageHost>> {
        match self.correlator.host_to_storage_host(host, connection).await {
            Ok(existing) => Ok(Some(existing)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Initiators identifying `host` over `protocol`
    pub async fn storage_initiators(
        &self,
        host: &ComputeHost,
        protocol: Protocol,
    ) -> Result<HostInitiators> {
        match protocol {
            Protocol::FibreChannel => {
                let hbas = self
                    .guard
                    .call("list_hbas", self.compute.list_hbas(host, HbaKind::FibreChannel))
                    .await?;
                let raw: String = hbas.iter().map(|hba| hba.identifier.as_str()).collect();
                let wwns = split_wwns(&raw)?;
                if wwns.is_empty() {
                    return Err(Error::not_found("FibreChannelHba", host.name.as_str()));
                }
                Ok(HostInitiators::FibreChannel(wwns))
            }
            Protocol::Iscsi => {
                let hbas = self
                    .guard
                    .call("list_hbas", self.compute.list_hbas(host, HbaKind::Iscsi))
                    .await?;
                let mut iqns: Vec<String> = hbas.into_iter().map(|hba| hba.identifier).collect();
                if iqns.is_empty() {
                    iqns = host.iqns.clone();
                }
                if iqns.is_empty() {
                    return Err(Error::not_found("IscsiInitiator", host.name.as_str()));
                }
                Ok(HostInitiators::Iscsi(iqns))
            }
        }
    }

    /// Create a storage host for `host`. `Conflict` if one already exists.
    pub async fn create_storage_host(
        &self,
        host: &ComputeHost,
        connection: &ArrayConnection,
        protocol: Protocol,
    ) -> Result<StorageHost> {
        if let Some(existing) = self.existing_storage_host(host, connection).await? {
            return Err(Error::Conflict(format!(
                "host {} already exists on {} as {}",
                host.name,
                connection.endpoint(),
                existing.name
            )));
        }

        let initiators = self.storage_initiators(host, protocol).await?;
        let name = storage_host_name(&host.name);
        let created = self
            .guard
            .call("create_host", connection.api().create_host(&name, &initiators))
            .await?;
        info!(
            host = %host.name,
            storage_host = %created.name,
            endpoint = %connection.endpoint(),
            protocol = %protocol,
            "Created storage host"
        );
        Ok(created)
    }

    /// Make sure every member of `cluster` has a storage host in one host
    /// group named after the cluster. Existing hosts are reused; hosts created
    /// here are removed again if the group cannot be completed.
    pub async fn create_host_group_from_cluster(
        &self,
        cluster: &str,
        connection: &ArrayConnection,
        protocol: Protocol,
    ) -> Result<StorageHostGroup> {
        let group_name = storage_host_name(cluster);
        let members = self
            .guard
            .call("list_cluster_hosts", self.compute.list_cluster_hosts(cluster))
            .await?;

        let mut ledger = RollbackLedger::new();
        match self
            .assemble_group(&group_name, &members, connection, protocol, &mut ledger)
            .await
        {
            Ok(group) => {
                info!(
                    cluster = %cluster,
                    group = %group.name,
                    hosts = group.hosts.len(),
                    endpoint = %connection.endpoint(),
                    "Host group ready"
                );
                Ok(group)
            }
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Host group creation failed");
                let report = ledger
                    .unwind(&**connection.api(), &self.guard.detached())
                    .await;
                if !report.is_clean() {
                    warn!(cluster = %cluster, failed = report.failed.len(), "Rollback incomplete");
                }
                Err(e)
            }
        }
    }

    async fn assemble_group(
        &self,
        group_name: &str,
        members: &[ComputeHost],
        connection: &ArrayConnection,
        protocol: Protocol,
        ledger: &mut RollbackLedger,
    ) -> Result<StorageHostGroup> {
        let mut host_names = Vec::with_capacity(members.len());
        for member in members {
            match self.existing_storage_host(member, connection).await? {
                Some(existing) => {
                    if let Some(other) = existing
                        .host_group
                        .as_deref()
                        .filter(|g| *g != group_name)
                    {
                        return Err(Error::Conflict(format!(
                            "host {} already belongs to host group {}",
                            existing.name, other
                        )));
                    }
                    debug!(host = %member.name, storage_host = %existing.name, "Reusing storage host");
                    host_names.push(existing.name);
                }
                None => {
                    let created = self.create_storage_host(member, connection, protocol).await?;
                    ledger.record(UndoAction::DeleteHost {
                        name: created.name.clone(),
                    });
                    host_names.push(created.name);
                }
            }
        }

        let api = connection.api();
        match self
            .guard
            .call("get_host_group", api.get_host_group(group_name))
            .await
        {
            Ok(group) => {
                let missing: Vec<String> = host_names
                    .into_iter()
                    .filter(|h| !group.hosts.contains(h))
                    .collect();
                if !missing.is_empty() {
                    self.guard
                        .call(
                            "add_hosts_to_group",
                            api.add_hosts_to_group(group_name, &missing),
                        )
                        .await?;
                }
                self.guard
                    .call("get_host_group", api.get_host_group(group_name))
                    .await
            }
            Err(Error::NotFound { .. }) => {
                let group = self
                    .guard
                    .call(
                        "create_host_group",
                        api.create_host_group(group_name, &host_names),
                    )
                    .await?;
                ledger.record(UndoAction::DeleteHostGroup {
                    name: group.name.clone(),
                });
                Ok(group)
            }
            Err(e) => Err(e),
        }
    }

    /// Point the host's software iSCSI adapter at every enabled iSCSI
    /// interface of the array. Returns the target addresses.
    pub async fn configure_iscsi_targets(
        &self,
        host: &ComputeHost,
        connection: &ArrayConnection,
    ) -> Result<Vec<String>> {
        let interfaces = self
            .guard
            .call(
                "list_network_interfaces",
                connection.api().list_network_interfaces(),
            )
            .await?;
        let targets: Vec<String> = interfaces
            .into_iter()
            .filter(|nic| nic.enabled && nic.service.eq_ignore_ascii_case(ISCSI_SERVICE))
            .filter_map(|nic| nic.address)
            .collect();
        if targets.is_empty() {
            return Err(Error::not_found("IscsiInterface", connection.endpoint()));
        }

        self.guard
            .call("enable_software_iscsi", self.compute.enable_software_iscsi(host))
            .await?;
        let hbas = self
            .guard
            .call("list_hbas", self.compute.list_hbas(host, HbaKind::Iscsi))
            .await?;
        let device = hbas
            .into_iter()
            .next()
            .map(|hba| hba.device)
            .ok_or_else(|| Error::not_found("IscsiHba", host.name.as_str()))?;

        let delayed_ack = self.iscsi.delayed_ack.to_string();
        let login_timeout = self.iscsi.login_timeout_secs.to_string();
        for address in &targets {
            self.guard
                .call(
                    "add_iscsi_target",
                    self.compute.add_iscsi_target(host, &device, address),
                )
                .await?;
            self.guard
                .call(
                    "set_iscsi_parameter",
                    self.compute
                        .set_iscsi_parameter(host, &device, address, DELAYED_ACK_KEY, &delayed_ack),
                )
                .await?;
            self.guard
                .call(
                    "set_iscsi_parameter",
                    self.compute.set_iscsi_parameter(
                        host,
                        &device,
                        address,
                        LOGIN_TIMEOUT_KEY,
                        &login_timeout,
                    ),
                )
                .await?;
        }

        info!(
            host = %host.name,
            adapter = %device,
            endpoint = %connection.endpoint(),
            targets = targets.len(),
            "Configured iSCSI targets"
        );
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::SimulatedArray;
    use crate::controlplane::platform::{SimulatedCompute, SOFTWARE_ISCSI_DEVICE};
    use crate::domain::ports::{ComputeApi, Credential, NetworkInterface};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct Fixture {
        array: Arc<SimulatedArray>,
        connection: ArrayConnection,
        compute: Arc<SimulatedCompute>,
        provisioner: HostProvisioner,
    }

    fn fixture() -> Fixture {
        let array = SimulatedArray::new("2dcf29ad-6aca-4913", "array-0");
        let connection = ArrayConnection::new(
            "10.0.0.5",
            Credential::new("pureuser", "pureuser"),
            array.identity().clone(),
            array.clone(),
        );
        let compute = Arc::new(SimulatedCompute::new());
        let provisioner =
            HostProvisioner::new(compute.clone(), CallGuard::default(), IscsiConfig::default());
        Fixture {
            array,
            connection,
            compute,
            provisioner,
        }
    }

    fn esxi(name: &str, wwns: &[&str]) -> ComputeHost {
        ComputeHost {
            name: name.to_string(),
            iqns: Vec::new(),
            wwns: wwns.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_fc_storage_host() {
        let f = fixture();
        let host = esxi("esxi-01.lab.local", &["2100001b32a0c1d2", "2100001b32a0c1d3"]);
        f.compute.add_host("10.1.1.11", host.clone(), Some("wd"));

        let created = f
            .provisioner
            .create_storage_host(&host, &f.connection, Protocol::FibreChannel)
            .await
            .unwrap();
        assert_eq!(created.name, "esxi-01");
        assert_eq!(created.wwns, vec!["2100001b32a0c1d2", "2100001b32a0c1d3"]);

        assert_matches!(
            f.provisioner
                .create_storage_host(&host, &f.connection, Protocol::FibreChannel)
                .await,
            Err(Error::Conflict(_))
        );
    }

    #[tokio::test]
    async fn test_create_iscsi_storage_host_uses_host_iqn() {
        let f = fixture();
        let host = ComputeHost {
            name: "esxi-02".into(),
            iqns: vec!["iqn.1998-01.com.vmware:esxi-02".into()],
            wwns: Vec::new(),
        };
        f.compute.add_host("10.1.1.12", host.clone(), None);

        let created = f
            .provisioner
            .create_storage_host(&host, &f.connection, Protocol::Iscsi)
            .await
            .unwrap();
        assert_eq!(created.iqns, vec!["iqn.1998-01.com.vmware:esxi-02"]);

        let no_fc = f
            .provisioner
            .storage_initiators(&host, Protocol::FibreChannel)
            .await;
        assert_matches!(no_fc, Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_host_group_from_cluster_reuses_existing_hosts() {
        let f = fixture();
        f.array.add_host(StorageHost {
            name: "esxi-01".into(),
            wwns: vec!["2100000000000001".into()],
            ..Default::default()
        });
        f.compute.add_host("10.1.1.11", esxi("esxi-01", &["2100000000000001"]), Some("wd-01"));
        f.compute.add_host("10.1.1.12", esxi("esxi-02", &["2100000000000002"]), Some("wd-01"));

        let group = f
            .provisioner
            .create_host_group_from_cluster("wd-01", &f.connection, Protocol::FibreChannel)
            .await
            .unwrap();
        assert_eq!(group.name, "wd-01");
        assert_eq!(group.hosts, vec!["esxi-01", "esxi-02"]);
        assert_eq!(f.array.hosts().len(), 2);

        // Running again is a no-op
        let again = f
            .provisioner
            .create_host_group_from_cluster("wd-01", &f.connection, Protocol::FibreChannel)
            .await
            .unwrap();
        assert_eq!(again, group);
    }

    #[tokio::test]
    async fn test_host_group_from_cluster_conflicts_with_other_group() {
        let f = fixture();
        f.array.add_host(StorageHost {
            name: "esxi-01".into(),
            wwns: vec!["2100000000000001".into()],
            host_group: Some("legacy".into()),
            ..Default::default()
        });
        f.compute.add_host("10.1.1.11", esxi("esxi-01", &["2100000000000001"]), Some("wd-01"));

        assert_matches!(
            f.provisioner
                .create_host_group_from_cluster("wd-01", &f.connection, Protocol::FibreChannel)
                .await,
            Err(Error::Conflict(_))
        );
    }

    #[tokio::test]
    async fn test_host_group_failure_removes_created_hosts() {
        let f = fixture();
        f.compute.add_host("10.1.1.11", esxi("esxi-01", &["2100000000000001"]), Some("wd-01"));
        f.compute.add_host("10.1.1.12", esxi("esxi-02", &["2100000000000002"]), Some("wd-01"));
        f.array.fail_on("create_host_group");

        let result = f
            .provisioner
            .create_host_group_from_cluster("wd-01", &f.connection, Protocol::FibreChannel)
            .await;
        assert_matches!(result, Err(Error::RemoteOperation { operation, .. }) if operation == "create_host_group");
        assert!(f.array.hosts().is_empty());
        assert!(f.array.host_groups().is_empty());
    }

    #[tokio::test]
    async fn test_configure_iscsi_targets() {
        let f = fixture();
        let host = esxi("esxi-01", &[]);
        f.compute.add_host("10.1.1.11", host.clone(), None);
        for (name, service, enabled, address) in [
            ("ct0.eth4", "iscsi", true, Some("10.20.0.10")),
            ("ct1.eth4", "iscsi", true, Some("10.20.0.11")),
            ("ct0.eth5", "iscsi", false, Some("10.20.0.12")),
            ("vir0", "management", true, Some("10.0.0.5")),
        ] {
            f.array.add_network_interface(NetworkInterface {
                name: name.into(),
                service: service.into(),
                enabled,
                address: address.map(str::to_string),
            });
        }

        let targets = f
            .provisioner
            .configure_iscsi_targets(&host, &f.connection)
            .await
            .unwrap();
        assert_eq!(targets, vec!["10.20.0.10", "10.20.0.11"]);
        assert_eq!(f.compute.iscsi_targets("esxi-01"), targets);
        assert_eq!(
            f.compute
                .iscsi_parameter("esxi-01", "10.20.0.11", DELAYED_ACK_KEY)
                .as_deref(),
            Some("false")
        );
        assert_eq!(
            f.compute
                .iscsi_parameter("esxi-01", "10.20.0.10", LOGIN_TIMEOUT_KEY)
                .as_deref(),
            Some("30")
        );

        let hbas = f.compute.list_hbas(&host, HbaKind::Iscsi).await.unwrap();
        assert_eq!(hbas[0].device, SOFTWARE_ISCSI_DEVICE);
    }

    #[tokio::test]
    async fn test_configure_iscsi_without_interfaces() {
        let f = fixture();
        let host = esxi("esxi-01", &[]);
        f.compute.add_host("10.1.1.11", host.clone(), None);

        assert_matches!(
            f.provisioner
                .configure_iscsi_targets(&host, &f.connection)
                .await,
            Err(Error::NotFound { .. })
        );
    }
}
