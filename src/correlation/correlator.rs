//! Resource Correlator
//!
//! Maps compute-side objects (datastores, hosts, clusters) onto the arrays and
//! storage objects that back them.
//!
//! Scans over independent candidates (arrays, cluster members) skip a
//! candidate whose lookup fails with a skippable error and keep going; only
//! once every candidate is exhausted does the scan report `NotFound`.

use crate::controlplane::context::RequestContext;
use crate::controlplane::guard::CallGuard;
use crate::correlation::identifiers::{
    iqn_eq, naa_to_volume_serial, serial_eq, vvol_array_serial, wwn_eq,
};
use crate::domain::ports::{
    ComputeApiRef, ComputeHost, Datastore, DatastoreBacking, DatastoreScope, StorageHost,
    StorageHostGroup, Volume,
};
use crate::error::{Error, Result};
use crate::registry::ArrayConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Host Group Match
// =============================================================================

/// Host groups the members of one cluster belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGroupMatch {
    pub cluster: String,
    /// In order of first appearance across the cluster's hosts
    pub groups: Vec<StorageHostGroup>,
}

impl HostGroupMatch {
    /// A cluster should map to exactly one group; more is a configuration
    /// anomaly callers surface as a warning.
    pub fn spans_multiple_groups(&self) -> bool {
        self.groups.len() > 1
    }

    /// The single group, or `Conflict` when the cluster spans several
    pub fn into_single(self) -> Result<StorageHostGroup> {
        if self.spans_multiple_groups() {
            let names: Vec<_> = self.groups.iter().map(|g| g.name.as_str()).collect();
            return Err(Error::Conflict(format!(
                "cluster {} spans multiple host groups: {}",
                self.cluster,
                names.join(", ")
            )));
        }
        self.groups
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("StorageHostGroup", self.cluster))
    }
}

// =============================================================================
// Resource Correlator
// =============================================================================

/// Correlates compute-side identities with storage-side objects
#[derive(Clone)]
pub struct ResourceCorrelator {
    compute: ComputeApiRef,
    guard: CallGuard,
}

impl ResourceCorrelator {
    pub fn new(compute: ComputeApiRef, guard: CallGuard) -> Self {
        Self { compute, guard }
    }

    pub fn guard(&self) -> &CallGuard {
        &self.guard
    }

    /// Look up a datastore by name across the whole compute inventory
    pub async fn find_datastore(&self, name: &str) -> Result<Datastore> {
        let datastores = self
            .guard
            .call("get_datastores", self.compute.get_datastores(&DatastoreScope::All))
            .await?;
        datastores
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::not_found("Datastore", name))
    }

    /// Array backing `datastore`. On success the context's current array is
    /// updated to the match.
    pub async fn datastore_to_array(
        &self,
        ctx: &mut RequestContext,
        datastore: &Datastore,
        candidates: &[Arc<ArrayConnection>],
    ) -> Result<Arc<ArrayConnection>> {
        let connection = match &datastore.backing {
            DatastoreBacking::Vmfs { disk_name } => {
                let serial = naa_to_volume_serial(disk_name).ok_or_else(|| {
                    Error::UnsupportedDatastore {
                        datastore: datastore.name.clone(),
                        reason: format!("disk {} is not an array volume", disk_name),
                    }
                })?;
                self.array_holding_volume(&datastore.name, &serial, candidates)
                    .await?
            }
            DatastoreBacking::Vvol { storage_array_uuid } => {
                let array_id = vvol_array_serial(storage_array_uuid).map_err(|e| {
                    Error::UnsupportedDatastore {
                        datastore: datastore.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                self.array_with_id(&datastore.name, &array_id, candidates)
                    .await?
            }
            _ => {
                return Err(Error::UnsupportedDatastore {
                    datastore: datastore.name.clone(),
                    reason: format!("{} datastores are not backed by an array", datastore.kind()),
                })
            }
        };

        info!(
            datastore = %datastore.name,
            endpoint = %connection.endpoint(),
            array = %connection.identity().name,
            "Datastore correlated to array"
        );
        ctx.set_current_array(connection.clone());
        Ok(connection)
    }

    async fn array_holding_volume(
        &self,
        datastore: &str,
        serial: &str,
        candidates: &[Arc<ArrayConnection>],
    ) -> Result<Arc<ArrayConnection>> {
        for candidate in candidates {
            let volumes = match self
                .guard
                .call("list_volumes", candidate.api().list_volumes())
                .await
            {
                Ok(volumes) => volumes,
                Err(e) if e.is_candidate_skippable() => {
                    debug!(endpoint = %candidate.endpoint(), error = %e, "Skipping array");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if volumes.iter().any(|v| serial_eq(&v.serial, serial)) {
                return Ok(candidate.clone());
            }
        }

        Err(Error::not_found(
            "ArrayConnection",
            format!("volume serial {} (datastore {})", serial, datastore),
        ))
    }

    async fn array_with_id(
        &self,
        datastore: &str,
        array_id: &str,
        candidates: &[Arc<ArrayConnection>],
    ) -> Result<Arc<ArrayConnection>> {
        for candidate in candidates {
            let identity = match self
                .guard
                .call("get_array_identity", candidate.api().get_array_identity())
                .await
            {
                Ok(identity) => identity,
                Err(e) if e.is_candidate_skippable() => {
                    debug!(endpoint = %candidate.endpoint(), error = %e, "Skipping array");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if identity.id.eq_ignore_ascii_case(array_id) {
                return Ok(candidate.clone());
            }
        }

        Err(Error::not_found(
            "ArrayConnection",
            format!("array id {} (datastore {})", array_id, datastore),
        ))
    }

    /// Array volume backing a VMFS datastore
    pub async fn volume_of_datastore(
        &self,
        datastore: &Datastore,
        connection: &ArrayConnection,
    ) -> Result<Volume> {
        let DatastoreBacking::Vmfs { disk_name } = &datastore.backing else {
            return Err(Error::UnsupportedDatastore {
                datastore: datastore.name.clone(),
                reason: format!("{} datastores have no single backing volume", datastore.kind()),
            });
        };
        let serial = naa_to_volume_serial(disk_name).ok_or_else(|| Error::UnsupportedDatastore {
            datastore: datastore.name.clone(),
            reason: format!("disk {} is not an array volume", disk_name),
        })?;

        let volumes = self
            .guard
            .call("list_volumes", connection.api().list_volumes())
            .await?;
        volumes
            .into_iter()
            .find(|v| serial_eq(&v.serial, &serial))
            .ok_or_else(|| Error::not_found("Volume", serial))
    }

    /// Storage host on `connection` for a compute host: IQNs first, then WWNs.
    ///
    /// Two different storage hosts claiming the compute host's initiators is
    /// reported as `Conflict` rather than picking one.
    pub async fn host_to_storage_host(
        &self,
        host: &ComputeHost,
        connection: &ArrayConnection,
    ) -> Result<StorageHost> {
        let storage_hosts = self
            .guard
            .call("list_hosts", connection.api().list_hosts())
            .await?;

        let by_iqn: Vec<&StorageHost> = storage_hosts
            .iter()
            .filter(|sh| {
                host.iqns
                    .iter()
                    .any(|iqn| sh.iqns.iter().any(|candidate| iqn_eq(iqn, candidate)))
            })
            .collect();
        if let Some(found) = single_match(host, connection, "IQN", by_iqn)? {
            return Ok(found);
        }

        let by_wwn: Vec<&StorageHost> = storage_hosts
            .iter()
            .filter(|sh| {
                host.wwns
                    .iter()
                    .any(|wwn| sh.wwns.iter().any(|candidate| wwn_eq(wwn, candidate)))
            })
            .collect();
        if let Some(found) = single_match(host, connection, "WWN", by_wwn)? {
            return Ok(found);
        }

        Err(Error::not_found(
            "StorageHost",
            format!("{} on {}", host.name, connection.endpoint()),
        ))
    }

    /// Host groups of a cluster's members on one array. Members whose storage
    /// host cannot be resolved are skipped.
    pub async fn cluster_to_host_groups(
        &self,
        cluster: &str,
        connection: &ArrayConnection,
    ) -> Result<HostGroupMatch> {
        let members = self
            .guard
            .call("list_cluster_hosts", self.compute.list_cluster_hosts(cluster))
            .await?;

        let mut group_names: Vec<String> = Vec::new();
        for member in &members {
            match self.host_to_storage_host(member, connection).await {
                Ok(StorageHost {
                    host_group: Some(group),
                    ..
                }) => {
                    if !group_names.contains(&group) {
                        group_names.push(group);
                    }
                }
                Ok(storage_host) => {
                    debug!(host = %member.name, storage_host = %storage_host.name, "Host is not in a host group");
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    debug!(host = %member.name, error = %e, "Skipping cluster member");
                }
            }
        }

        let mut groups = Vec::with_capacity(group_names.len());
        for name in &group_names {
            match self
                .guard
                .call("get_host_group", connection.api().get_host_group(name))
                .await
            {
                Ok(group) => groups.push(group),
                Err(e) if e.is_candidate_skippable() => {
                    debug!(group = %name, error = %e, "Skipping host group");
                }
                Err(e) => return Err(e),
            }
        }

        if groups.is_empty() {
            return Err(Error::not_found(
                "StorageHostGroup",
                format!("cluster {} on {}", cluster, connection.endpoint()),
            ));
        }

        let matched = HostGroupMatch {
            cluster: cluster.to_string(),
            groups,
        };
        if matched.spans_multiple_groups() {
            warn!(
                cluster = %cluster,
                endpoint = %connection.endpoint(),
                groups = ?group_names,
                "Cluster spans multiple host groups"
            );
        }
        Ok(matched)
    }

    /// Host groups of a cluster on every candidate array; arrays where the
    /// lookup fails are skipped.
    pub async fn host_groups_across_arrays(
        &self,
        ctx: &RequestContext,
        cluster: &str,
        candidates: Option<&[Arc<ArrayConnection>]>,
    ) -> Result<Vec<(Arc<ArrayConnection>, HostGroupMatch)>> {
        let candidates = ctx.candidates(candidates)?;

        let mut matches = Vec::new();
        for candidate in candidates {
            match self.cluster_to_host_groups(cluster, &candidate).await {
                Ok(matched) => matches.push((candidate, matched)),
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    debug!(endpoint = %candidate.endpoint(), error = %e, "No host group on array");
                }
            }
        }

        if matches.is_empty() {
            return Err(Error::not_found("StorageHostGroup", format!("cluster {}", cluster)));
        }
        Ok(matches)
    }
}

fn single_match(
    host: &ComputeHost,
    connection: &ArrayConnection,
    identifier: &str,
    mut matches: Vec<&StorageHost>,
) -> Result<Option<StorageHost>> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop().cloned()),
        _ => {
            let names: Vec<_> = matches.iter().map(|sh| sh.name.as_str()).collect();
            Err(Error::Conflict(format!(
                "{} of host {} is claimed by several hosts on {}: {}",
                identifier,
                host.name,
                connection.endpoint(),
                names.join(", ")
            )))
        }
    }
}
