//! Background-refreshed cache of external target outcomes.
//!
//! The set of entries is fixed when the cache is built. Each entry is its own
//! atomically swapped slot: a finished probe replaces only its slot, and a
//! reader loads every slot without taking a lock. An in-flight probe is never
//! visible; readers see either the previous completed outcome or the new one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::outcome::{ErrorKind, Failure, ProbeClock, ProbeOutcome};
use crate::prober::Probe;
use crate::target::ProbeTarget;

/// Extra time a probe may overrun its own timeout before the refresh gives up on it
const PROBE_GRACE: Duration = Duration::from_millis(250);

/// Most recent completed outcome for one external target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The target probed
    pub target: ProbeTarget,
    /// Outcome of the last completed probe
    pub last_outcome: ProbeOutcome,
    /// When the last probe completed
    pub last_updated: DateTime<Utc>,
}

type Slots = HashMap<String, ArcSwapOption<CacheEntry>>;

/// Read-only handle onto the cache entries.
#[derive(Clone, Debug)]
pub struct CacheReader {
    slots: Arc<Slots>,
}

impl CacheReader {
    /// Current entries keyed by target address.
    ///
    /// Targets that have not completed a probe yet are absent.
    #[must_use]
    pub fn read(&self) -> HashMap<String, CacheEntry> {
        self.slots
            .iter()
            .filter_map(|(address, slot)| {
                slot.load_full()
                    .map(|entry| (address.clone(), entry.as_ref().clone()))
            })
            .collect()
    }
}

struct Shared<P>
where
    P: Probe,
{
    probe: Arc<P>,
    targets: Box<[ProbeTarget]>,
    slots: Arc<Slots>,
    refresh_lock: Mutex<()>,
}

impl<P> Shared<P>
where
    P: Probe,
{
    async fn refresh(&self) {
        // Refreshes never overlap, whether driven by the loop or on demand
        let _refresh = self.refresh_lock.lock().await;
        let mut tasks = JoinSet::new();

        for target in self.targets.iter().cloned() {
            let probe = Arc::clone(&self.probe);
            let slots = Arc::clone(&self.slots);
            tasks.spawn(async move {
                let clock = ProbeClock::start();
                let limit = target.timeout() + PROBE_GRACE;
                let outcome = match tokio::time::timeout(limit, probe.execute(&target)).await {
                    Ok(outcome) => outcome,
                    Err(_) => clock.finish(Err(Failure::new(
                        ErrorKind::Timeout,
                        format!(
                            "probe overran its {} timeout",
                            crate::serde_duration::format(target.timeout())
                        ),
                    ))),
                };

                if let Some(slot) = slots.get(target.address()) {
                    record(slot, &target, &outcome, Utc::now());
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "external probe task failed");
            }
        }
    }
}

/// Periodically probes the configured external targets.
pub struct ExternalProbeCache<P>
where
    P: Probe,
{
    shared: Arc<Shared<P>>,
    refresh_interval: Duration,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<P> ExternalProbeCache<P>
where
    P: Probe,
{
    /// Create a cache over `targets`, refreshed every `refresh_interval`.
    ///
    /// Targets sharing an address are probed once, using the first.
    pub fn new(probe: Arc<P>, targets: &[ProbeTarget], refresh_interval: Duration) -> Self {
        let mut slots = Slots::with_capacity(targets.len());
        let mut unique = Vec::with_capacity(targets.len());

        for target in targets {
            if slots.contains_key(target.address()) {
                warn!(addr = target.address(), "duplicate external target ignored");
                continue;
            }
            slots.insert(target.address().to_string(), ArcSwapOption::empty());
            unique.push(target.clone());
        }

        Self {
            shared: Arc::new(Shared {
                probe,
                targets: unique.into(),
                slots: Arc::new(slots),
                refresh_lock: Mutex::new(()),
            }),
            refresh_interval,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// A handle for reading entries without owning the cache.
    #[must_use]
    pub fn reader(&self) -> CacheReader {
        CacheReader {
            slots: Arc::clone(&self.shared.slots),
        }
    }

    /// Current entries keyed by target address. Never blocks.
    #[must_use]
    pub fn read(&self) -> HashMap<String, CacheEntry> {
        self.reader().read()
    }

    /// Probe every target once, concurrently.
    ///
    /// Each entry is updated as soon as its own probe finishes. Waits for any
    /// refresh already in progress.
    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    /// Start the background refresh task. The first refresh runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the task was started before.
    pub fn start(&self) -> Result<()> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        info!(
            targets = self.shared.targets.len(),
            refresh_interval_ms = self.refresh_interval.as_millis(),
            "starting external probe cache"
        );

        let shared = Arc::clone(&self.shared);
        let refresh_interval = self.refresh_interval;
        let shutdown_token = self.shutdown_token.clone();

        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            biased;
                            () = shutdown_token.cancelled() => break,
                            () = shared.refresh() => {}
                        }
                    }
                }
            }

            debug!("external probe cache task exiting");
        });

        self.task_tracker.close();

        Ok(())
    }

    /// Stop the background refresh task and wait for it to exit.
    pub async fn shutdown(&self) {
        info!("external probe cache shutting down");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}

impl<P> fmt::Debug for ExternalProbeCache<P>
where
    P: Probe,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalProbeCache")
            .field("targets", &self.shared.targets)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

/// Replace the slot's entry, keeping `last_updated` monotonic.
///
/// The clamp and the swap are one atomic step, so concurrent writers can
/// never move `last_updated` backwards.
fn record(
    slot: &ArcSwapOption<CacheEntry>,
    target: &ProbeTarget,
    outcome: &ProbeOutcome,
    now: DateTime<Utc>,
) {
    debug!(
        addr = target.address(),
        ok = outcome.ok,
        error_kind = %outcome.error_kind,
        "external target refreshed"
    );

    slot.rcu(|previous| {
        let last_updated = previous
            .as_ref()
            .map_or(now, |previous| previous.last_updated.max(now));

        Some(Arc::new(CacheEntry {
            target: target.clone(),
            last_outcome: outcome.clone(),
            last_updated,
        }))
    });
}
