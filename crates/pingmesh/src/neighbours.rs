//! Concurrent reachability checks against every peer.
//!
//! A round launches one check per peer at once and collects results until
//! every check finishes or the round deadline passes, whichever is first.
//! Checks still running at the deadline are aborted and recorded as timeouts.
//! Results live in a map owned by the round, so an aborted check can never
//! leak into a later round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::discovery::Peer;
use crate::outcome::{ErrorKind, ProbeOutcome};
use crate::prober::{PeerCheck, Probe};

/// What a peer reports about itself from its check endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerReport {
    /// The peer's own node ID
    pub node_id: String,
    /// When the peer process started
    pub boot_time: DateTime<Utc>,
    /// The peer's own cluster health verdict, if it has one yet
    #[serde(default)]
    pub healthy: Option<bool>,
}

/// Result of checking one peer in one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighbourResult {
    /// ID of the peer checked
    pub peer_id: String,
    /// Address the peer was checked on
    pub address: String,
    /// Reachability outcome
    pub outcome: ProbeOutcome,
    /// The peer's self report, present only when the check succeeded with a body
    pub peer_report: Option<PeerReport>,
}

/// Checks all peers concurrently under a round deadline.
#[derive(Debug)]
pub struct NeighbourChecker<P>
where
    P: Probe,
{
    probe: Arc<P>,
    peer_port: u16,
    check_path: String,
}

impl<P> NeighbourChecker<P>
where
    P: Probe,
{
    /// Create a checker reaching peers on the configured port and path.
    pub fn new(probe: Arc<P>, config: &AgentConfig) -> Self {
        Self {
            probe,
            peer_port: config.peer_port,
            check_path: config.check_path.clone(),
        }
    }

    /// Check every peer, returning one result per peer ID.
    ///
    /// Each check is bounded by `per_peer_timeout` and the whole call by
    /// `overall_deadline`. A peer repeated in `peers` is checked once.
    pub async fn check_all(
        &self,
        peers: &[Peer],
        per_peer_timeout: Duration,
        overall_deadline: Duration,
    ) -> HashMap<String, NeighbourResult> {
        let round_start = Instant::now();
        let deadline = round_start + overall_deadline;
        let started_at = Utc::now();

        let mut pending: HashMap<String, Peer> = HashMap::with_capacity(peers.len());
        let mut tasks = JoinSet::new();

        for peer in peers {
            if pending.contains_key(&peer.id) {
                warn!(peer_id = %peer.id, "duplicate peer in discovery output, checking once");
                continue;
            }
            pending.insert(peer.id.clone(), peer.clone());

            let probe = Arc::clone(&self.probe);
            let peer_id = peer.id.clone();
            let url = peer.check_url(self.peer_port, &self.check_path);
            tasks.spawn(async move {
                let check = probe.check_peer(&url, per_peer_timeout).await;
                (peer_id, check)
            });
        }

        let mut results = HashMap::with_capacity(pending.len());
        let mut deadline_hit = false;

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((peer_id, PeerCheck { outcome, report })))) => {
                    if let Some(peer) = pending.remove(&peer_id) {
                        results.insert(
                            peer_id.clone(),
                            NeighbourResult {
                                peer_id,
                                address: peer.address,
                                outcome,
                                peer_report: report,
                            },
                        );
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "peer check task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let elapsed = round_start.elapsed();
        for (peer_id, peer) in pending {
            let outcome = if deadline_hit {
                ProbeOutcome::failure(
                    ErrorKind::Timeout,
                    format!(
                        "check did not finish within the {} round deadline",
                        crate::serde_duration::format(overall_deadline)
                    ),
                    started_at,
                    elapsed,
                )
            } else {
                ProbeOutcome::failure(
                    ErrorKind::Connection,
                    "check task aborted before completing",
                    started_at,
                    elapsed,
                )
            };

            debug!(peer_id = %peer_id, error_kind = %outcome.error_kind, "peer check incomplete");
            results.insert(
                peer_id.clone(),
                NeighbourResult {
                    peer_id,
                    address: peer.address,
                    outcome,
                    peer_report: None,
                },
            );
        }

        let unreachable = results.values().filter(|r| !r.outcome.ok).count();
        info!(
            peers = results.len(),
            unreachable,
            deadline_hit,
            duration_ms = elapsed.as_millis(),
            "neighbour round complete"
        );

        results
    }
}
