//! Array Orchestrator CLI
//!
//! Runs correlation and provisioning operations against a lab estate seeded
//! from a YAML inventory (simulated arrays and compute hosts).

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use array_orchestrator::{
    ArrayConnection, CallGuard, ConnectionRegistry, Credential, Error, HostProvisioner,
    LabInventory, OrchestratorConfig, Protocol, ProvisioningWorkflow, RequestContext,
    ResourceCorrelator, SimulatedArray, SimulatedArrayConnector, SimulatedCompute, VolumeSize,
    WorkloadDomainRequest,
};
use array_orchestrator::domain::ports::ComputeApi;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Array Orchestrator - correlate and provision storage across arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Orchestrator configuration file (YAML)
    #[arg(long, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Lab inventory describing arrays and compute hosts (YAML)
    #[arg(long, env = "ORCHESTRATOR_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Compute host username; overrides the inventory
    #[arg(long, env = "COMPUTE_USER")]
    compute_user: Option<String>,

    /// Compute host password; overrides the inventory
    #[arg(long, env = "COMPUTE_PASSWORD", hide_env_values = true)]
    compute_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Selects an array by its array id instead of the default
#[derive(ClapArgs, Debug, Clone)]
struct ArraySelector {
    /// Array id (as reported by the array); defaults to the default array
    #[arg(long)]
    array_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered array connections
    Arrays,

    /// Find the array (and volume) backing a datastore
    LocateDatastore {
        /// Datastore name
        name: String,
    },

    /// Show the host groups a compute cluster maps to on each array
    HostGroups {
        /// Cluster name
        cluster: String,
        #[command(flatten)]
        array: ArraySelector,
    },

    /// Create (or complete) a host group for a compute cluster
    CreateHostGroup {
        /// Cluster name
        cluster: String,
        /// Protocol: FC or iSCSI
        #[arg(long, default_value = "FC", value_parser = parse_protocol)]
        protocol: Protocol,
        #[command(flatten)]
        array: ArraySelector,
    },

    /// Initialize a workload domain on one array
    InitWorkloadDomain {
        /// Compute host management addresses
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
        /// Name of the volume and datastore to create
        #[arg(long)]
        datastore: String,
        /// Volume size in gigabytes
        #[arg(long)]
        size_gb: Option<u64>,
        /// Volume size in terabytes
        #[arg(long)]
        size_tb: Option<u64>,
        /// Protocol: FC or iSCSI (only FC is supported)
        #[arg(long, default_value = "FC", value_parser = parse_protocol)]
        protocol: Protocol,
        #[command(flatten)]
        array: ArraySelector,
    },

    /// Point a host's software iSCSI adapter at an array's iSCSI interfaces
    ConfigureIscsi {
        /// Compute host management address
        #[arg(long)]
        host: String,
        #[command(flatten)]
        array: ArraySelector,
    },
}

/// Accepts the legacy protocol strings as well as the enum spellings
fn parse_protocol(raw: &str) -> std::result::Result<Protocol, String> {
    match raw.to_ascii_lowercase().as_str() {
        "fc" | "fibre-channel" | "fibre_channel" => Ok(Protocol::FibreChannel),
        "iscsi" => Ok(Protocol::Iscsi),
        other => Err(format!("unknown protocol '{}' (expected FC or iSCSI)", other)),
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!(version = array_orchestrator::VERSION, "Starting {}", array_orchestrator::NAME);

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    let inventory = match &args.inventory {
        Some(path) => LabInventory::load(path)
            .with_context(|| format!("loading inventory {}", path.display()))?,
        None => LabInventory::default(),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            on_interrupt.cancel();
        }
    });

    let lab = Lab::build(&inventory).await?;
    let guard = CallGuard::from_config(&config, cancel);
    let compute_credential = compute_credential(&args, &inventory);

    let mut ctx = RequestContext::new(lab.registry.clone());

    match args.command {
        Command::Arrays => {
            let arrays: Vec<ArraySummary> = lab
                .registry
                .all()?
                .iter()
                .map(|c| ArraySummary::new(c, &lab.registry))
                .collect();
            print_json(&arrays)?;
        }

        Command::LocateDatastore { name } => {
            let correlator = ResourceCorrelator::new(lab.compute.clone(), guard);
            let datastore = correlator.find_datastore(&name).await?;
            let candidates = ctx.candidates(None)?;
            let connection = correlator
                .datastore_to_array(&mut ctx, &datastore, &candidates)
                .await?;
            let volume = match correlator.volume_of_datastore(&datastore, &connection).await {
                Ok(volume) => Some(volume),
                Err(Error::UnsupportedDatastore { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            print_json(&serde_json::json!({
                "datastore": datastore,
                "array": ArraySummary::new(&connection, &lab.registry),
                "volume": volume,
            }))?;
        }

        Command::HostGroups { cluster, array } => {
            let correlator = ResourceCorrelator::new(lab.compute.clone(), guard);
            let matches = match selected_array(&lab.registry, &array)? {
                Some(connection) => vec![(
                    connection.clone(),
                    correlator.cluster_to_host_groups(&cluster, &connection).await?,
                )],
                None => {
                    correlator
                        .host_groups_across_arrays(&ctx, &cluster, None)
                        .await?
                }
            };
            let report: Vec<_> = matches
                .iter()
                .map(|(connection, matched)| {
                    serde_json::json!({
                        "array": ArraySummary::new(connection, &lab.registry),
                        "groups": matched.groups,
                        "spans_multiple_groups": matched.spans_multiple_groups(),
                    })
                })
                .collect();
            print_json(&report)?;
        }

        Command::CreateHostGroup {
            cluster,
            protocol,
            array,
        } => {
            let explicit = selected_array(&lab.registry, &array)?;
            let connection = ctx.resolve_array(explicit.as_ref())?;
            let provisioner =
                HostProvisioner::new(lab.compute.clone(), guard, config.iscsi.clone());
            let group = provisioner
                .create_host_group_from_cluster(&cluster, &connection, protocol)
                .await?;
            print_json(&group)?;
        }

        Command::InitWorkloadDomain {
            hosts,
            datastore,
            size_gb,
            size_tb,
            protocol,
            array,
        } => {
            let size = VolumeSize::from_parts(size_gb, size_tb)?;
            let request = WorkloadDomainRequest {
                host_addresses: hosts,
                credential: compute_credential,
                array: selected_array(&lab.registry, &array)?,
                datastore_name: datastore,
                size,
                protocol,
            };
            let workflow = ProvisioningWorkflow::new(lab.compute.clone(), config.clone(), guard);
            let domain = workflow.initialize_workload_domain(&ctx, request).await?;
            print_json(&domain)?;
        }

        Command::ConfigureIscsi { host, array } => {
            let explicit = selected_array(&lab.registry, &array)?;
            let connection = ctx.resolve_array(explicit.as_ref())?;
            let session = guard
                .call("open_session", lab.compute.open_session(&host, &compute_credential))
                .await?;
            let provisioner =
                HostProvisioner::new(lab.compute.clone(), guard.clone(), config.iscsi.clone());
            let outcome = match guard.call("get_host", lab.compute.get_host(&session)).await {
                Ok(compute_host) => {
                    provisioner
                        .configure_iscsi_targets(&compute_host, &connection)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = guard
                .detached()
                .call("close_session", lab.compute.close_session(&session))
                .await
            {
                warn!(host = %host, error = %e, "Failed to close compute session");
            }
            print_json(&outcome?)?;
        }
    }

    debug!(stats = ?lab.registry.stats(), "Registry statistics");
    Ok(())
}

// =============================================================================
// Lab Estate
// =============================================================================

struct Lab {
    registry: Arc<ConnectionRegistry>,
    compute: Arc<SimulatedCompute>,
}

impl Lab {
    /// Seed simulated arrays and hosts, then connect to every array. The
    /// array flagged `default` (or the first one) becomes the default.
    async fn build(inventory: &LabInventory) -> anyhow::Result<Self> {
        let registry = ConnectionRegistry::new();
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                debug!(event = ?event, "Registry event");
            }
        });

        let connector = SimulatedArrayConnector::new();
        for seed in &inventory.arrays {
            let array = SimulatedArray::new(seed.id.as_str(), seed.name.as_str());
            for volume in &seed.volumes {
                array.add_volume(&volume.name, &volume.serial, volume.size_bytes);
            }
            for host in &seed.hosts {
                array.add_host(host.clone());
            }
            for interface in &seed.network_interfaces {
                array.add_network_interface(interface.clone());
            }
            connector.add_array(&seed.endpoint, seed.credential.clone(), array);
        }

        let default_index = inventory.arrays.iter().position(|a| a.default).unwrap_or(0);
        for (index, seed) in inventory.arrays.iter().enumerate() {
            let is_default = index == default_index;
            registry
                .connect(
                    &connector,
                    &seed.endpoint,
                    seed.credential.clone(),
                    is_default,
                    !is_default,
                )
                .await
                .with_context(|| format!("connecting to {}", seed.endpoint))?;
        }

        let compute = Arc::new(SimulatedCompute::new());
        for seed in &inventory.compute.hosts {
            compute.add_host(&seed.address, seed.host.clone(), seed.cluster.as_deref());
        }
        for seed in &inventory.compute.datastores {
            compute.add_datastore(&seed.host, seed.datastore.clone());
        }

        info!(
            arrays = registry.len(),
            hosts = inventory.compute.hosts.len(),
            "Lab estate ready"
        );
        Ok(Self { registry, compute })
    }
}

fn compute_credential(args: &Args, inventory: &LabInventory) -> Credential {
    let from_inventory = inventory.compute.credential.clone();
    let username = args
        .compute_user
        .clone()
        .or_else(|| from_inventory.as_ref().map(|c| c.username.clone()))
        .unwrap_or_else(|| "root".to_string());
    let secret = args
        .compute_password
        .clone()
        .or_else(|| from_inventory.map(|c| c.secret))
        .unwrap_or_default();
    Credential::new(username, secret)
}

fn selected_array(
    registry: &ConnectionRegistry,
    selector: &ArraySelector,
) -> anyhow::Result<Option<Arc<ArrayConnection>>> {
    match &selector.array_id {
        Some(id) => Ok(Some(registry.resolve_by_id(None, id)?)),
        None => Ok(None),
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Serialize)]
struct ArraySummary {
    endpoint: String,
    id: String,
    name: String,
    version: String,
    default: bool,
    connected_at: chrono::DateTime<chrono::Utc>,
}

impl ArraySummary {
    fn new(connection: &ArrayConnection, registry: &ConnectionRegistry) -> Self {
        let default = registry
            .default_connection()
            .map(|d| d.endpoint() == connection.endpoint())
            .unwrap_or(false);
        let identity = connection.identity();
        Self {
            endpoint: connection.endpoint().to_string(),
            id: identity.id.clone(),
            name: identity.name.clone(),
            version: identity.version.clone(),
            default,
            connected_at: connection.connected_at(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr; stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_protocol_strings() {
        assert_eq!(parse_protocol("FC").unwrap(), Protocol::FibreChannel);
        assert_eq!(parse_protocol("iSCSI").unwrap(), Protocol::Iscsi);
        assert!(parse_protocol("nvme").is_err());
    }

    #[test]
    fn test_cli_parses_workload_domain_command() {
        let args = Args::try_parse_from([
            "array-orchestrator",
            "init-workload-domain",
            "--host",
            "10.1.1.11",
            "--host",
            "10.1.1.12",
            "--datastore",
            "wd-ds01",
            "--size-tb",
            "4",
            "--protocol",
            "FC",
        ])
        .unwrap();

        match args.command {
            Command::InitWorkloadDomain {
                hosts,
                size_tb,
                protocol,
                ..
            } => {
                assert_eq!(hosts.len(), 2);
                assert_eq!(size_tb, Some(4));
                assert_eq!(protocol, Protocol::FibreChannel);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
