//! CLI binary running a mesh agent against a static peer list.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pingmesh::{
    AgentConfig, CurrentSnapshot, IpVersion, MeshAgent, Peer, ProbeTarget, StaticDiscovery,
    serde_duration,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Agent library error
    #[error(transparent)]
    Agent(#[from] pingmesh::Error),

    /// Configuration file error
    #[error("config file error: {0}")]
    ConfigFile(String),

    /// Logging setup error
    #[error("logging error: {0}")]
    Logging(String),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON file with the base agent configuration; flags override it
    #[arg(long, env = "PINGMESH_CONFIG")]
    config: Option<PathBuf>,

    /// This instance's peer ID
    #[arg(long, env = "PINGMESH_NODE_ID")]
    node_id: Option<String>,

    /// Peer as `id=address`, repeatable
    #[arg(long = "peer", env = "PINGMESH_PEERS", value_delimiter = ',')]
    peers: Vec<Peer>,

    /// External target as `dns:<name>`, `tcp:<host:port>` or an http(s) URL, repeatable
    #[arg(long = "target", env = "PINGMESH_TARGETS", value_delimiter = ',')]
    targets: Vec<String>,

    /// Timeout applied to targets given with --target
    #[arg(long, default_value = "1s", env = "PINGMESH_TARGET_TIMEOUT", value_parser = parse_duration)]
    target_timeout: Duration,

    /// External target refresh interval
    #[arg(long, env = "PINGMESH_REFRESH_INTERVAL", value_parser = parse_duration)]
    refresh_interval: Option<Duration>,

    /// Neighbour round interval
    #[arg(long, env = "PINGMESH_UPDATE_INTERVAL", value_parser = parse_duration)]
    update_interval: Option<Duration>,

    /// Per-peer check timeout
    #[arg(long, env = "PINGMESH_CHECK_TIMEOUT", value_parser = parse_duration)]
    check_timeout: Option<Duration>,

    /// Deadline for a whole neighbour round
    #[arg(long, env = "PINGMESH_CHECK_ALL_TIMEOUT", value_parser = parse_duration)]
    check_all_timeout: Option<Duration>,

    /// IP version used for DNS and TCP probes (4 or 6)
    #[arg(long, env = "PINGMESH_IP_VERSION")]
    ip_version: Option<IpVersion>,

    /// Port of the peers' check endpoint
    #[arg(long, env = "PINGMESH_PEER_PORT")]
    peer_port: Option<u16>,

    /// Path of the peers' check endpoint
    #[arg(long, env = "PINGMESH_CHECK_PATH")]
    check_path: Option<String>,

    /// Number of peers checked per round, 0 checks all
    #[arg(long, env = "PINGMESH_PING_NUMBER")]
    ping_number: Option<usize>,

    /// How often the current snapshot is logged
    #[arg(long, default_value = "10s", env = "PINGMESH_REPORT_INTERVAL", value_parser = parse_duration)]
    report_interval: Duration,

    /// Log level (debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", env = "PINGMESH_LOG_LEVEL")]
    log_level: String,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    serde_duration::parse(s)
}

fn init_logging(level: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::Logging(format!("invalid log level '{level}': {e}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn build_config(args: &Args) -> Result<AgentConfig, Error> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::ConfigFile(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::ConfigFile(format!("failed to parse {}: {e}", path.display()))
            })?
        }
        None => AgentConfig::default(),
    };

    if let Some(node_id) = &args.node_id {
        config.node_id.clone_from(node_id);
    }

    for text in &args.targets {
        config
            .external_targets
            .push(ProbeTarget::parse(text, args.target_timeout)?);
    }

    if let Some(interval) = args.refresh_interval {
        config.refresh_interval = interval;
    }
    if let Some(interval) = args.update_interval {
        config.update_interval = interval;
    }
    if let Some(timeout) = args.check_timeout {
        config.check_timeout = timeout;
    }
    if let Some(timeout) = args.check_all_timeout {
        config.check_all_timeout = timeout;
    }
    if let Some(ip_version) = args.ip_version {
        config.ip_version = ip_version;
    }
    if let Some(port) = args.peer_port {
        config.peer_port = port;
    }
    if let Some(path) = &args.check_path {
        config.check_path.clone_from(path);
    }
    if let Some(ping_number) = args.ping_number {
        config.ping_number = ping_number;
    }

    if config.node_id.is_empty() {
        warn!("no node ID configured, this node cannot recognise itself among its peers");
    }

    Ok(config)
}

fn log_startup(config: &AgentConfig, peers: usize) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %config.node_id,
        peers,
        external_targets = config.external_targets.len(),
        ip_version = %config.ip_version,
        "starting pingmesh"
    );
}

fn log_snapshot(agent: &MeshAgent<StaticDiscovery>) {
    match agent.current_snapshot() {
        CurrentSnapshot::NotInitialized => {
            info!(state = %agent.updater_state(), "no cluster snapshot published yet");
        }
        CurrentSnapshot::Ready(snapshot) => {
            let failing_externals: Vec<&str> = snapshot
                .externals
                .iter()
                .filter(|(_, entry)| !entry.last_outcome.ok)
                .map(|(address, _)| address.as_str())
                .collect();

            info!(
                healthy = snapshot.healthy,
                neighbours = snapshot.neighbours.len(),
                reachable = snapshot.reachable_count(),
                unreachable = ?snapshot.unreachable_peers(),
                externals = snapshot.externals.len(),
                failing_externals = ?failing_externals,
                generated_at = %snapshot.generated_at,
                "cluster snapshot"
            );

            match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => debug!(snapshot = %json, "cluster snapshot detail"),
                Err(e) => warn!(error = %e, "failed to serialize cluster snapshot"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = build_config(&args)?;
    log_startup(&config, args.peers.len());

    let discovery = Arc::new(StaticDiscovery::new(args.peers.clone()));
    let agent = MeshAgent::new(config, discovery)?;
    agent.start()?;

    let mut report = tokio::time::interval(args.report_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    report.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("Shutting down");
                break;
            }
            _ = report.tick() => log_snapshot(&agent),
        }
    }

    agent.shutdown().await;

    Ok(())
}
