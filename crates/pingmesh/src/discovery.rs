//! Peer descriptors and the discovery seam.

use std::collections::HashSet;
use std::fmt::Debug;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::Error;

/// Error reported by a discovery collaborator.
pub type DiscoveryError = Box<dyn std::error::Error + Send + Sync>;

/// Another instance of the agent, as reported by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Stable identity of the peer
    pub id: String,
    /// IP literal or host name the peer is reachable on
    pub address: String,
}

impl Peer {
    /// Create a peer descriptor.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }

    /// URL of this peer's check endpoint.
    #[must_use]
    pub fn check_url(&self, port: u16, path: &str) -> String {
        match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("http://[{ip}]:{port}{path}"),
            _ => format!("http://{}:{port}{path}", self.address),
        }
    }
}

impl FromStr for Peer {
    type Err = Error;

    /// Parse an `id=address` pair.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, address) = s
            .split_once('=')
            .map(|(id, address)| (id.trim(), address.trim()))
            .ok_or_else(|| Error::Discovery(format!("expected id=address, got '{s}'")))?;

        if id.is_empty() || address.is_empty() {
            return Err(Error::Discovery(format!(
                "peer '{s}' has an empty id or address"
            )));
        }

        Ok(Self::new(id, address))
    }
}

/// Source of the current peer set.
///
/// Called once at the start of every neighbour round; the returned set may
/// differ between calls.
#[async_trait]
pub trait Discovery
where
    Self: Debug + Send + Sync + 'static,
{
    /// List the peers currently in the cluster.
    async fn list_peers(&self) -> Result<Vec<Peer>, DiscoveryError>;
}

/// Discovery over a fixed (but replaceable) list of peers.
#[derive(Debug)]
pub struct StaticDiscovery {
    peers: ArcSwap<Vec<Peer>>,
}

impl StaticDiscovery {
    /// Create a discovery source returning `peers`.
    #[must_use]
    pub fn new(peers: Vec<Peer>) -> Self {
        Self {
            peers: ArcSwap::from_pointee(peers),
        }
    }

    /// Replace the peer set returned by subsequent calls.
    pub fn set_peers(&self, peers: Vec<Peer>) {
        self.peers.store(Arc::new(peers));
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list_peers(&self) -> Result<Vec<Peer>, DiscoveryError> {
        Ok(self.peers.load().as_ref().clone())
    }
}

/// Choose the peers this node checks in a round.
///
/// The peer with `node_id` is dropped, as are repeated IDs after the first.
/// With `ping_number > 0` only that many peers are kept, picked by highest
/// rendezvous score so every node checks a stable, evenly spread subset.
#[must_use]
pub fn select_peers(node_id: &str, peers: Vec<Peer>, ping_number: usize) -> Vec<Peer> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<Peer> = peers
        .into_iter()
        .filter(|peer| peer.id != node_id && seen.insert(peer.id.clone()))
        .collect();

    if ping_number == 0 || candidates.len() <= ping_number {
        return candidates;
    }

    let mut scored: Vec<(u64, &str)> = candidates
        .iter()
        .map(|peer| (rendezvous_score(node_id, &peer.id), peer.id.as_str()))
        .collect();
    scored.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let chosen: HashSet<String> = scored
        .into_iter()
        .take(ping_number)
        .map(|(_, id)| id.to_string())
        .collect();

    candidates.retain(|peer| chosen.contains(&peer.id));
    candidates
}

fn rendezvous_score(node_id: &str, peer_id: &str) -> u64 {
    let key = format!("{node_id}/{peer_id}");
    XxHash64::oneshot(0, key.as_bytes())
}
