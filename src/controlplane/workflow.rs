//! Workload Domain Provisioning Workflow
//!
//! Turns a set of compute hosts into a workload domain on one array: storage
//! hosts, a host group, a volume connected to the group and a VMFS datastore
//! on that volume.
//!
//! Steps run in a fixed order. Each array-side create pushes its undo action
//! onto the run's ledger only after it succeeds; any failure unwinds the
//! ledger and closes every compute session before the original error is
//! returned.

use crate::config::OrchestratorConfig;
use crate::controlplane::context::RequestContext;
use crate::controlplane::guard::CallGuard;
use crate::controlplane::hosts::HostProvisioner;
use crate::controlplane::ledger::{RollbackLedger, UndoAction};
use crate::correlation::identifiers::{storage_host_name, volume_serial_to_naa};
use crate::domain::ports::{
    ComputeApiRef, ComputeHost, ComputeSession, Credential, Datastore, Protocol, StorageHost,
    StorageHostGroup, Volume,
};
use crate::error::{Error, Result};
use crate::registry::ArrayConnection;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

// =============================================================================
// Steps
// =============================================================================

/// Workflow steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    OpenSessions,
    CreateHosts,
    CreateHostGroup,
    CreateVolume,
    ConnectVolume,
    CreateDatastore,
    RescanHosts,
    CloseSessions,
}

impl WorkflowStep {
    /// 1-based position in the run
    pub fn number(&self) -> u8 {
        *self as u8 + 1
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStep::OpenSessions => "open-sessions",
            WorkflowStep::CreateHosts => "create-hosts",
            WorkflowStep::CreateHostGroup => "create-host-group",
            WorkflowStep::CreateVolume => "create-volume",
            WorkflowStep::ConnectVolume => "connect-volume",
            WorkflowStep::CreateDatastore => "create-datastore",
            WorkflowStep::RescanHosts => "rescan-hosts",
            WorkflowStep::CloseSessions => "close-sessions",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Request
// =============================================================================

/// Size of the workload domain's volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSize {
    Gigabytes(u64),
    Terabytes(u64),
}

impl VolumeSize {
    /// Exactly one of the two units must be given
    pub fn from_parts(gigabytes: Option<u64>, terabytes: Option<u64>) -> Result<Self> {
        let size = match (gigabytes, terabytes) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "specify the volume size in gigabytes or terabytes, not both".into(),
                ))
            }
            (None, None) => {
                return Err(Error::Configuration(
                    "a volume size in gigabytes or terabytes is required".into(),
                ))
            }
            (Some(gb), None) => VolumeSize::Gigabytes(gb),
            (None, Some(tb)) => VolumeSize::Terabytes(tb),
        };
        size.bytes()?;
        Ok(size)
    }

    pub fn bytes(&self) -> Result<u64> {
        let (count, unit) = match *self {
            VolumeSize::Gigabytes(gb) => (gb, GIB),
            VolumeSize::Terabytes(tb) => (tb, TIB),
        };
        if count == 0 {
            return Err(Error::Configuration("volume size must be greater than zero".into()));
        }
        count
            .checked_mul(unit)
            .ok_or_else(|| Error::Configuration(format!("volume size {} is too large", self)))
    }
}

impl fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeSize::Gigabytes(gb) => write!(f, "{}GB", gb),
            VolumeSize::Terabytes(tb) => write!(f, "{}TB", tb),
        }
    }
}

/// Inputs for one workload-domain initialization
#[derive(Debug, Clone)]
pub struct WorkloadDomainRequest {
    /// Management addresses of the compute hosts
    pub host_addresses: Vec<String>,
    pub credential: Credential,
    /// Target array; falls back to the context's resolution order
    pub array: Option<Arc<ArrayConnection>>,
    pub datastore_name: String,
    pub size: VolumeSize,
    pub protocol: Protocol,
}

impl WorkloadDomainRequest {
    pub fn validate(&self) -> Result<()> {
        if self.protocol != Protocol::FibreChannel {
            return Err(Error::Configuration(format!(
                "protocol {} is not supported for workload domains; only fc is",
                self.protocol
            )));
        }
        if self.host_addresses.is_empty() {
            return Err(Error::Configuration("at least one host address is required".into()));
        }
        if self.datastore_name.trim().is_empty() {
            return Err(Error::Configuration("datastore name must not be empty".into()));
        }
        self.size.bytes()?;
        Ok(())
    }
}

/// What a successful run created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDomain {
    pub host_group: StorageHostGroup,
    pub hosts: Vec<StorageHost>,
    pub volume: Volume,
    pub datastore: Datastore,
}

// =============================================================================
// Provisioning Session
// =============================================================================

/// State of one run
#[derive(Debug, Default)]
pub struct ProvisioningSession {
    current: Option<WorkflowStep>,
    completed: Option<WorkflowStep>,
    sessions: Vec<ComputeSession>,
    hosts: Vec<ComputeHost>,
    ledger: RollbackLedger,
}

impl ProvisioningSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&mut self, step: WorkflowStep) {
        debug!(step = %step, number = step.number(), "Starting step");
        self.current = Some(step);
    }

    fn complete(&mut self) {
        self.completed = self.current;
    }

    /// Step in progress, or the last one started
    pub fn current_step(&self) -> Option<WorkflowStep> {
        self.current
    }

    /// Highest step that finished
    pub fn last_completed(&self) -> Option<WorkflowStep> {
        self.completed
    }

    pub fn ledger(&self) -> &RollbackLedger {
        &self.ledger
    }

    pub fn open_sessions(&self) -> &[ComputeSession] {
        &self.sessions
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// Workload-domain initialization
pub struct ProvisioningWorkflow {
    compute: ComputeApiRef,
    config: OrchestratorConfig,
    guard: CallGuard,
    provisioner: HostProvisioner,
}

impl ProvisioningWorkflow {
    pub fn new(compute: ComputeApiRef, config: OrchestratorConfig, guard: CallGuard) -> Self {
        let provisioner = HostProvisioner::new(compute.clone(), guard.clone(), config.iscsi.clone());
        Self {
            compute,
            config,
            guard,
            provisioner,
        }
    }

    pub fn provisioner(&self) -> &HostProvisioner {
        &self.provisioner
    }

    /// Provision a workload domain. Input is validated before any remote call.
    pub async fn initialize_workload_domain(
        &self,
        ctx: &RequestContext,
        request: WorkloadDomainRequest,
    ) -> Result<WorkloadDomain> {
        request.validate()?;
        let connection = ctx.resolve_array(request.array.as_ref())?;

        info!(
            endpoint = %connection.endpoint(),
            hosts = request.host_addresses.len(),
            datastore = %request.datastore_name,
            size = %request.size,
            "Initializing workload domain"
        );

        let mut session = ProvisioningSession::new();
        match self.run(&mut session, &connection, &request).await {
            Ok(domain) => {
                session.begin(WorkflowStep::CloseSessions);
                self.close_sessions(&mut session, &self.guard.detached()).await;
                session.complete();
                info!(
                    endpoint = %connection.endpoint(),
                    host_group = %domain.host_group.name,
                    volume = %domain.volume.name,
                    datastore = %domain.datastore.name,
                    "Workload domain initialized"
                );
                Ok(domain)
            }
            Err(e) => {
                error!(
                    step = %session.current_step().map(|s| s.to_string()).unwrap_or_default(),
                    completed = ?session.last_completed(),
                    undo_actions = session.ledger().len(),
                    error = %e,
                    "Workload domain initialization failed"
                );
                self.rollback(session, &connection).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut ProvisioningSession,
        connection: &ArrayConnection,
        request: &WorkloadDomainRequest,
    ) -> Result<WorkloadDomain> {
        let api = connection.api();

        session.begin(WorkflowStep::OpenSessions);
        for address in &request.host_addresses {
            let opened = self
                .guard
                .call("open_session", self.compute.open_session(address, &request.credential))
                .await?;
            session.sessions.push(opened.clone());
            let host = self
                .guard
                .call("get_host", self.compute.get_host(&opened))
                .await?;
            debug!(address = %address, host = %host.name, "Compute session opened");
            session.hosts.push(host);
        }
        session.complete();

        session.begin(WorkflowStep::CreateHosts);
        let mut storage_hosts = Vec::with_capacity(session.hosts.len());
        for (index, host) in session.hosts.iter().enumerate() {
            if let Some(existing) = self.provisioner.existing_storage_host(host, connection).await? {
                return Err(if index == 0 {
                    Error::Conflict(format!(
                        "host {} is already defined on {} as {}; the workload domain appears to be initialized already",
                        host.name,
                        connection.endpoint(),
                        existing.name
                    ))
                } else {
                    Error::Conflict(format!(
                        "host {} already exists on {} as {}",
                        host.name,
                        connection.endpoint(),
                        existing.name
                    ))
                });
            }

            let initiators = self
                .provisioner
                .storage_initiators(host, request.protocol)
                .await?;
            let name = storage_host_name(&host.name);
            let created = self
                .guard
                .call("create_host", api.create_host(&name, &initiators))
                .await?;
            session.ledger.record(UndoAction::DeleteHost {
                name: created.name.clone(),
            });
            storage_hosts.push(created);
        }
        session.complete();

        session.begin(WorkflowStep::CreateHostGroup);
        let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
        let group_name = format!("{}{}", self.config.host_group_prefix, suffix);
        let host_names: Vec<String> = storage_hosts.iter().map(|h| h.name.clone()).collect();
        let host_group = self
            .guard
            .call("create_host_group", api.create_host_group(&group_name, &host_names))
            .await?;
        session.ledger.record(UndoAction::DeleteHostGroup {
            name: host_group.name.clone(),
        });
        session.complete();

        session.begin(WorkflowStep::CreateVolume);
        let size_bytes = request.size.bytes()?;
        let volume = self
            .guard
            .call("create_volume", api.create_volume(&request.datastore_name, size_bytes))
            .await?;
        session.ledger.record(UndoAction::DeleteVolume {
            name: volume.name.clone(),
        });
        session.complete();

        session.begin(WorkflowStep::ConnectVolume);
        self.guard
            .call(
                "connect_volume_to_group",
                api.connect_volume_to_group(&volume.name, &host_group.name),
            )
            .await?;
        session.ledger.record(UndoAction::DisconnectVolume {
            volume: volume.name.clone(),
            group: host_group.name.clone(),
        });
        session.complete();

        // The compute side offers no datastore delete, so a created datastore
        // commits the run.
        session.begin(WorkflowStep::CreateDatastore);
        let disk_path = volume_serial_to_naa(&volume.serial);
        let representative = session
            .hosts
            .first()
            .ok_or_else(|| Error::Configuration("at least one host address is required".into()))?;
        self.guard
            .call("rescan_storage", self.compute.rescan_storage(representative))
            .await?;
        let datastore = self
            .guard
            .call(
                "create_vmfs_datastore",
                self.compute
                    .create_vmfs_datastore(representative, &request.datastore_name, &disk_path),
            )
            .await?;
        session.complete();

        // Past the commit point the run no longer observes cancellation.
        let committed = self.guard.detached();
        session.begin(WorkflowStep::RescanHosts);
        for host in &session.hosts {
            if let Err(e) = committed
                .call("rescan_storage", self.compute.rescan_storage(host))
                .await
            {
                warn!(host = %host.name, error = %e, "Rescan failed; datastore may not be visible yet");
            }
        }
        session.complete();

        Ok(WorkloadDomain {
            host_group,
            hosts: storage_hosts,
            volume,
            datastore,
        })
    }

    async fn rollback(&self, mut session: ProvisioningSession, connection: &ArrayConnection) {
        let guard = self.guard.detached();
        let ledger = std::mem::take(&mut session.ledger);
        let report = ledger.unwind(&**connection.api(), &guard).await;
        if report.is_clean() {
            info!(
                endpoint = %connection.endpoint(),
                undone = report.undone.len(),
                "Rollback complete"
            );
        } else {
            for (action, reason) in &report.failed {
                error!(
                    endpoint = %connection.endpoint(),
                    action = %action,
                    error = %reason,
                    "Rollback left a resource behind"
                );
            }
        }
        self.close_sessions(&mut session, &guard).await;
    }

    async fn close_sessions(&self, session: &mut ProvisioningSession, guard: &CallGuard) {
        for opened in session.sessions.drain(..) {
            if let Err(e) = guard
                .call("close_session", self.compute.close_session(&opened))
                .await
            {
                warn!(address = %opened.address, error = %e, "Failed to close compute session");
            }
        }
    }
}
