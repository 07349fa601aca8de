//! Cluster connectivity agent.
//!
//! Every instance periodically checks all of its peers concurrently under a
//! round deadline, probes a set of external targets in the background, and
//! publishes an immutable [`ClusterSnapshot`] combining both. Cluster health
//! is derived from neighbour reachability only; external targets are
//! reported but never affect it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod agent;
mod aggregator;
mod cache;
mod config;
mod discovery;
mod error;
mod neighbours;
mod outcome;
mod prober;
mod resolver;
pub mod serde_duration;
mod target;
mod updater;

#[cfg(test)]
mod testing;

pub use agent::MeshAgent;
pub use aggregator::{ClusterSnapshot, aggregate, cluster_healthy};
pub use cache::{CacheEntry, CacheReader, ExternalProbeCache};
pub use config::{
    AgentConfig, DEFAULT_CHECK_ALL_TIMEOUT, DEFAULT_CHECK_PATH, DEFAULT_CHECK_TIMEOUT,
    DEFAULT_PEER_PORT, DEFAULT_REFRESH_INTERVAL, DEFAULT_UPDATE_INTERVAL, IpVersion,
};
pub use discovery::{Discovery, DiscoveryError, Peer, StaticDiscovery, select_peers};
pub use error::{Error, Result};
pub use neighbours::{NeighbourChecker, NeighbourResult, PeerReport};
pub use outcome::{ErrorKind, ProbeOutcome};
pub use prober::{PeerCheck, Probe, Prober};
pub use resolver::{LookupError, NameResolver, SystemResolver};
pub use target::{ProbeKind, ProbeTarget};
pub use updater::{CurrentSnapshot, Updater, UpdaterState};
