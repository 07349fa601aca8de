//! The driver loop: on every tick, check all peers and publish a snapshot.
//!
//! The updater only reads the external cache; the cache refreshes on its own
//! schedule so a stalled round never delays external freshness.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::aggregator::{ClusterSnapshot, aggregate};
use crate::cache::CacheReader;
use crate::config::AgentConfig;
use crate::discovery::{Discovery, select_peers};
use crate::error::{Error, Result};
use crate::neighbours::NeighbourChecker;
use crate::prober::Probe;

/// Where the updater is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpdaterState {
    /// Waiting for the next tick
    Idle = 0,
    /// A round is in progress
    RunningRound = 1,
    /// A snapshot was just published
    Published = 2,
    /// The background task has been shut down
    Stopped = 3,
}

impl UpdaterState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RunningRound,
            2 => Self::Published,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for UpdaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::RunningRound => "running-round",
            Self::Published => "published",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The latest published state, or an explicit marker that none exists yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CurrentSnapshot {
    /// No round has completed yet
    NotInitialized,
    /// The most recently published snapshot
    Ready(Arc<ClusterSnapshot>),
}

impl CurrentSnapshot {
    /// The snapshot, if one has been published.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&Arc<ClusterSnapshot>> {
        match self {
            Self::NotInitialized => None,
            Self::Ready(snapshot) => Some(snapshot),
        }
    }

    /// Whether a snapshot has been published.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

struct Shared<D, P>
where
    D: Discovery,
    P: Probe,
{
    config: AgentConfig,
    discovery: Arc<D>,
    checker: NeighbourChecker<P>,
    cache: CacheReader,
    published: ArcSwapOption<ClusterSnapshot>,
    state: AtomicU8,
    rounds: AtomicU64,
    round_lock: Mutex<()>,
}

impl<D, P> Shared<D, P>
where
    D: Discovery,
    P: Probe,
{
    fn set_state(&self, state: UpdaterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    async fn run_round(&self) -> Option<Arc<ClusterSnapshot>> {
        // Rounds never overlap, whether driven by the loop or on demand
        let _round = self.round_lock.lock().await;

        let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(UpdaterState::RunningRound);
        debug!(round, "starting neighbour round");

        let discovered = tokio::time::timeout(
            self.config.check_all_timeout,
            self.discovery.list_peers(),
        )
        .await;

        let peers = match discovered {
            Ok(Ok(peers)) => peers,
            Ok(Err(e)) => {
                warn!(round, error = %e, "peer discovery failed, keeping previous snapshot");
                self.set_state(UpdaterState::Idle);
                return None;
            }
            Err(_) => {
                warn!(round, "peer discovery timed out, keeping previous snapshot");
                self.set_state(UpdaterState::Idle);
                return None;
            }
        };

        let discovered = peers.len();
        let peers = select_peers(&self.config.node_id, peers, self.config.ping_number);

        let neighbours = self
            .checker
            .check_all(
                &peers,
                self.config.check_timeout,
                self.config.check_all_timeout,
            )
            .await;
        let externals = self.cache.read();

        // Never publish a snapshot older than the one readers already saw
        let now = Utc::now();
        let generated_at = self
            .published
            .load_full()
            .map_or(now, |previous| previous.generated_at.max(now));

        let snapshot = Arc::new(aggregate(neighbours, externals, generated_at));
        self.published.store(Some(Arc::clone(&snapshot)));
        self.set_state(UpdaterState::Published);

        info!(
            round,
            discovered,
            checked = snapshot.neighbours.len(),
            unreachable = snapshot.neighbours.len() - snapshot.reachable_count(),
            externals = snapshot.externals.len(),
            healthy = snapshot.healthy,
            "published cluster snapshot"
        );

        self.set_state(UpdaterState::Idle);
        Some(snapshot)
    }
}

/// Drives neighbour rounds and publishes snapshots.
pub struct Updater<D, P>
where
    D: Discovery,
    P: Probe,
{
    shared: Arc<Shared<D, P>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<D, P> Updater<D, P>
where
    D: Discovery,
    P: Probe,
{
    /// Create an updater checking peers from `discovery` with `probe`.
    pub fn new(config: &AgentConfig, discovery: Arc<D>, probe: Arc<P>, cache: CacheReader) -> Self {
        let checker = NeighbourChecker::new(probe, config);

        Self {
            shared: Arc::new(Shared {
                config: config.clone(),
                discovery,
                checker,
                cache,
                published: ArcSwapOption::empty(),
                state: AtomicU8::new(UpdaterState::Idle as u8),
                rounds: AtomicU64::new(0),
                round_lock: Mutex::new(()),
            }),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The latest published snapshot. Never blocks.
    #[must_use]
    pub fn current_snapshot(&self) -> CurrentSnapshot {
        self.shared
            .published
            .load_full()
            .map_or(CurrentSnapshot::NotInitialized, CurrentSnapshot::Ready)
    }

    /// Where the updater currently is in its cycle.
    #[must_use]
    pub fn state(&self) -> UpdaterState {
        UpdaterState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Number of rounds started so far.
    #[must_use]
    pub fn rounds_started(&self) -> u64 {
        self.shared.rounds.load(Ordering::SeqCst)
    }

    /// Run one round now and publish its snapshot.
    ///
    /// Waits for any round already in progress. Returns `None` if discovery
    /// failed, in which case the previous snapshot stays current.
    pub async fn run_round(&self) -> Option<Arc<ClusterSnapshot>> {
        self.shared.run_round().await
    }

    /// Start the background loop. The first round runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the loop was started before.
    pub fn start(&self) -> Result<()> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let update_interval: Duration = self.shared.config.update_interval;
        info!(
            update_interval_ms = update_interval.as_millis(),
            check_timeout_ms = self.shared.config.check_timeout.as_millis(),
            check_all_timeout_ms = self.shared.config.check_all_timeout.as_millis(),
            "starting updater"
        );

        let shared = Arc::clone(&self.shared);
        let shutdown_token = self.shutdown_token.clone();

        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(update_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            biased;
                            () = shutdown_token.cancelled() => break,
                            _ = shared.run_round() => {}
                        }
                    }
                }
            }

            debug!("updater task exiting");
        });

        self.task_tracker.close();

        Ok(())
    }

    /// Stop the background loop and wait for it to exit.
    pub async fn shutdown(&self) {
        info!("updater shutting down");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.shared.set_state(UpdaterState::Stopped);
    }
}

impl<D, P> fmt::Debug for Updater<D, P>
where
    D: Discovery,
    P: Probe,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater")
            .field("state", &self.state())
            .field("rounds_started", &self.rounds_started())
            .finish_non_exhaustive()
    }
}
