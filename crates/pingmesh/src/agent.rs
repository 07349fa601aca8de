//! The composed agent: one prober shared by the external cache and the
//! neighbour updater.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregator::ClusterSnapshot;
use crate::cache::ExternalProbeCache;
use crate::config::AgentConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::neighbours::PeerReport;
use crate::outcome::ProbeOutcome;
use crate::prober::{Probe, Prober};
use crate::target::ProbeTarget;
use crate::updater::{CurrentSnapshot, Updater, UpdaterState};

/// A running mesh agent.
pub struct MeshAgent<D, P = Prober>
where
    D: Discovery,
    P: Probe,
{
    config: AgentConfig,
    boot_time: DateTime<Utc>,
    probe: Arc<P>,
    cache: ExternalProbeCache<P>,
    updater: Updater<D, P>,
}

impl<D> MeshAgent<D, Prober>
where
    D: Discovery,
{
    /// Create an agent probing the real network.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the HTTP client cannot be
    /// built.
    pub fn new(config: AgentConfig, discovery: Arc<D>) -> Result<Self> {
        let prober = Prober::new(config.ip_version)?;
        Self::with_probe(config, discovery, Arc::new(prober))
    }
}

impl<D, P> MeshAgent<D, P>
where
    D: Discovery,
    P: Probe,
{
    /// Create an agent using `probe` for every check.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` is invalid.
    pub fn with_probe(config: AgentConfig, discovery: Arc<D>, probe: Arc<P>) -> Result<Self> {
        config.validate()?;

        let cache = ExternalProbeCache::new(
            Arc::clone(&probe),
            &config.external_targets,
            config.refresh_interval,
        );
        let updater = Updater::new(&config, discovery, Arc::clone(&probe), cache.reader());

        Ok(Self {
            config,
            boot_time: Utc::now(),
            probe,
            cache,
            updater,
        })
    }

    /// Start the external cache and the updater loops.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyStarted`] if the agent was started before.
    pub fn start(&self) -> Result<()> {
        info!(
            node_id = %self.config.node_id,
            external_targets = self.config.external_targets.len(),
            "starting mesh agent"
        );

        self.cache.start()?;
        self.updater.start()?;

        Ok(())
    }

    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(&self) {
        self.updater.shutdown().await;
        self.cache.shutdown().await;

        info!(node_id = %self.config.node_id, "mesh agent stopped");
    }

    /// The latest published snapshot. Never blocks.
    #[must_use]
    pub fn current_snapshot(&self) -> CurrentSnapshot {
        self.updater.current_snapshot()
    }

    /// Probe a single target on demand, outside the cache.
    pub async fn trigger_probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        self.probe.execute(target).await
    }

    /// Run one neighbour round now and publish its snapshot.
    ///
    /// Returns `None` if discovery failed and nothing was published.
    pub async fn run_round_now(&self) -> Option<Arc<ClusterSnapshot>> {
        self.updater.run_round().await
    }

    /// What this node reports about itself to peers checking it.
    #[must_use]
    pub fn local_report(&self) -> PeerReport {
        PeerReport {
            node_id: self.config.node_id.clone(),
            boot_time: self.boot_time,
            healthy: self.current_snapshot().snapshot().map(|s| s.healthy),
        }
    }

    /// Where the updater currently is in its cycle.
    #[must_use]
    pub fn updater_state(&self) -> UpdaterState {
        self.updater.state()
    }

    /// Number of neighbour rounds started so far.
    #[must_use]
    pub fn rounds_started(&self) -> u64 {
        self.updater.rounds_started()
    }

    /// The configuration the agent was built with.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl<D, P> fmt::Debug for MeshAgent<D, P>
where
    D: Discovery,
    P: Probe,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshAgent")
            .field("node_id", &self.config.node_id)
            .field("boot_time", &self.boot_time)
            .field("updater", &self.updater)
            .finish_non_exhaustive()
    }
}
