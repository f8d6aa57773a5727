//! Array Orchestrator - Multi-Array Storage Control Plane
//!
//! Correlates hypervisor datastores, hosts and clusters with the storage
//! arrays that back them, and provisions workload domains (storage hosts, a
//! host group, a volume and a VMFS datastore) with rollback on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Provisioning Workflow                               │
//! │        (ordered steps + rollback ledger, guarded remote calls)          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐   ┌──────────────────────┐                    │
//! │  │  Resource Correlator │   │   Host Provisioner   │                    │
//! │  │ datastore/host/group │   │  hosts, groups, iSCSI│                    │
//! │  └──────────┬───────────┘   └──────────┬───────────┘                    │
//! │             │     Identifier Codec     │                                │
//! │             │  (NAA, VVol UUID, WWN)   │                                │
//! │             └────────────┬─────────────┘                                │
//! │              ┌───────────┴───────────┐                                  │
//! │              │  Connection Registry  │                                  │
//! │              └───────────────────────┘                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │      StorageArrayApi (per array)        │        ComputeApi             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: Authenticated array connections and the default array
//! - [`correlation`]: Identifier parsing and compute-to-array correlation
//! - [`controlplane`]: Call guard, request context, provisioning workflow
//! - [`domain`]: Collaborator traits and the shared data model
//! - [`config`]: YAML configuration and lab inventory
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod correlation;
pub mod domain;
pub mod error;
pub mod registry;

// Re-export commonly used types
pub use config::{IscsiConfig, LabInventory, OrchestratorConfig};

pub use controlplane::{
    CallGuard, HostProvisioner, ProvisioningWorkflow, RequestContext, RollbackLedger,
    RollbackReport, UndoAction, VolumeSize, WorkflowStep, WorkloadDomain, WorkloadDomainRequest,
    SimulatedArray, SimulatedArrayConnector, SimulatedCompute,
};

pub use correlation::{HostGroupMatch, ResourceCorrelator};

pub use domain::ports::{
    ArrayConnector, ArrayIdentity, ComputeApi, ComputeHost, Credential, Datastore,
    DatastoreBacking, DatastoreKind, Protocol, StorageArrayApi, StorageHost, StorageHostGroup,
    Volume,
};

pub use error::{Error, Result};

pub use registry::{ArrayConnection, ConnectionRegistry, RegistryEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
