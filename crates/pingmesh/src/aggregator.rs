//! Combines a neighbour round and the external cache into a snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::neighbours::NeighbourResult;

/// Immutable, fully formed view of one completed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Neighbour results keyed by peer ID
    pub neighbours: HashMap<String, NeighbourResult>,
    /// External target entries keyed by target address, for reporting only
    pub externals: HashMap<String, CacheEntry>,
    /// Whether every neighbour was reachable
    pub healthy: bool,
    /// When the snapshot was produced
    pub generated_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// Number of neighbours that answered.
    #[must_use]
    pub fn reachable_count(&self) -> usize {
        self.neighbours.values().filter(|r| r.outcome.ok).count()
    }

    /// IDs of neighbours that did not answer, sorted.
    #[must_use]
    pub fn unreachable_peers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .neighbours
            .values()
            .filter(|r| !r.outcome.ok)
            .map(|r| r.peer_id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Cluster health: true iff every neighbour is reachable.
///
/// An empty neighbour set is healthy. External targets play no part.
#[must_use]
pub fn cluster_healthy(neighbours: &HashMap<String, NeighbourResult>) -> bool {
    neighbours.values().all(|result| result.outcome.ok)
}

/// Build a snapshot from one round's neighbour results and the external cache.
#[must_use]
pub fn aggregate(
    neighbours: HashMap<String, NeighbourResult>,
    externals: HashMap<String, CacheEntry>,
    generated_at: DateTime<Utc>,
) -> ClusterSnapshot {
    let healthy = cluster_healthy(&neighbours);

    ClusterSnapshot {
        neighbours,
        externals,
        healthy,
        generated_at,
    }
}
