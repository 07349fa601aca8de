use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pingmesh::{
    AgentConfig, CurrentSnapshot, ErrorKind, ExternalProbeCache, IpVersion, MeshAgent, Peer,
    ProbeTarget, Prober, StaticDiscovery, Updater,
};

mod common;
use common::{closed_port, spawn_http, wait_for};

/// Config checking peers on the port of a loopback server.
fn config(peer_server: SocketAddr, external_targets: Vec<ProbeTarget>) -> AgentConfig {
    AgentConfig {
        node_id: "node-a".to_string(),
        external_targets,
        update_interval: Duration::from_millis(200),
        refresh_interval: Duration::from_millis(200),
        check_timeout: Duration::from_millis(500),
        check_all_timeout: Duration::from_secs(1),
        peer_port: peer_server.port(),
        ..AgentConfig::default()
    }
}

type Parts = (
    Updater<StaticDiscovery, Prober>,
    ExternalProbeCache<Prober>,
    Arc<StaticDiscovery>,
);

fn parts(config: &AgentConfig, peers: Vec<Peer>) -> Parts {
    let prober = Arc::new(Prober::new(IpVersion::V4).unwrap());
    let discovery = Arc::new(StaticDiscovery::new(peers));
    let cache = ExternalProbeCache::new(
        Arc::clone(&prober),
        &config.external_targets,
        config.refresh_interval,
    );
    let updater = Updater::new(config, Arc::clone(&discovery), prober, cache.reader());
    (updater, cache, discovery)
}

#[tokio::test]
async fn test_healthy_despite_failing_externals() {
    let peer_server = spawn_http(200, "").await;
    let bad_status = spawn_http(503, "").await;
    let refused = closed_port().await;

    let config = config(
        peer_server,
        vec![
            ProbeTarget::http(format!("http://{bad_status}/"), Duration::from_secs(1)),
            ProbeTarget::tcp(refused.to_string(), Duration::from_secs(1)),
        ],
    );
    let peers = vec![
        Peer::new("node-a", "127.0.0.1"),
        Peer::new("node-b", "127.0.0.1"),
        Peer::new("node-c", "127.0.0.1"),
    ];
    let (updater, cache, _) = parts(&config, peers);

    cache.refresh().await;
    let snapshot = updater.run_round().await.unwrap();

    assert!(snapshot.healthy);
    assert_eq!(snapshot.neighbours.len(), 2);
    assert_eq!(snapshot.reachable_count(), 2);

    assert_eq!(snapshot.externals.len(), 2);
    let http = &snapshot.externals[&format!("http://{bad_status}/")];
    assert_eq!(http.last_outcome.error_kind, ErrorKind::BadStatus);
    assert_eq!(http.last_outcome.error_detail, "503");
    let tcp = &snapshot.externals[&refused.to_string()];
    assert_eq!(tcp.last_outcome.error_kind, ErrorKind::Connection);
}

#[tokio::test]
async fn test_one_dead_peer_makes_cluster_unhealthy() {
    let peer_server = spawn_http(200, "").await;
    let reachable = spawn_http(200, "").await;

    let config = config(
        peer_server,
        vec![ProbeTarget::tcp(reachable.to_string(), Duration::from_secs(1))],
    );
    // Nothing listens on the peer port at 127.0.0.2
    let peers = vec![
        Peer::new("node-b", "127.0.0.1"),
        Peer::new("node-c", "127.0.0.1"),
        Peer::new("node-d", "127.0.0.2"),
    ];
    let (updater, cache, _) = parts(&config, peers);

    cache.refresh().await;
    let snapshot = updater.run_round().await.unwrap();

    assert!(!snapshot.healthy);
    assert_eq!(snapshot.unreachable_peers(), vec!["node-d"]);
    assert!(snapshot.externals[&reachable.to_string()].last_outcome.ok);
}

#[tokio::test]
async fn test_peer_report_is_carried_into_snapshot() {
    let peer_agent = MeshAgent::new(
        AgentConfig {
            node_id: "node-b".to_string(),
            ..AgentConfig::default()
        },
        Arc::new(StaticDiscovery::new(Vec::new())),
    )
    .unwrap();
    let report = peer_agent.local_report();
    let peer_server = spawn_http(200, serde_json::to_string(&report).unwrap()).await;

    let config = config(peer_server, Vec::new());
    let (updater, _cache, _) = parts(&config, vec![Peer::new("node-b", "127.0.0.1")]);

    let snapshot = updater.run_round().await.unwrap();
    let neighbour = &snapshot.neighbours["node-b"];
    assert!(neighbour.outcome.ok);
    assert_eq!(neighbour.peer_report.as_ref(), Some(&report));
    assert_eq!(neighbour.address, "127.0.0.1");
}

#[tokio::test]
async fn test_snapshots_are_ordered_and_immutable() {
    let peer_server = spawn_http(200, "").await;
    let config = config(peer_server, Vec::new());
    let (updater, _cache, discovery) = parts(&config, vec![Peer::new("node-b", "127.0.0.1")]);

    let first = updater.run_round().await.unwrap();
    discovery.set_peers(vec![
        Peer::new("node-b", "127.0.0.1"),
        Peer::new("node-c", "127.0.0.1"),
    ]);
    let second = updater.run_round().await.unwrap();

    assert!(second.generated_at >= first.generated_at);
    assert_eq!(first.neighbours.len(), 1);
    assert_eq!(second.neighbours.len(), 2);
    assert_eq!(
        updater.current_snapshot(),
        CurrentSnapshot::Ready(Arc::clone(&second))
    );
}

#[tokio::test]
async fn test_agent_lifecycle() {
    let peer_server = spawn_http(200, "").await;
    let reachable = spawn_http(200, "").await;

    let config = config(
        peer_server,
        vec![ProbeTarget::http(format!("http://{reachable}/"), Duration::from_secs(1))],
    );
    let discovery = Arc::new(StaticDiscovery::new(vec![
        Peer::new("node-a", "127.0.0.1"),
        Peer::new("node-b", "127.0.0.1"),
    ]));
    let agent = MeshAgent::new(config, discovery).unwrap();

    assert_eq!(agent.current_snapshot(), CurrentSnapshot::NotInitialized);
    assert_eq!(agent.local_report().healthy, None);

    agent.start().unwrap();

    // The updater keeps publishing; wait for a snapshot that includes the refreshed external
    let published = wait_for(Duration::from_secs(5), || {
        agent
            .current_snapshot()
            .snapshot()
            .is_some_and(|s| s.externals.len() == 1)
    })
    .await;
    assert!(published);

    let snapshot = agent.current_snapshot().snapshot().cloned().unwrap();
    assert!(snapshot.healthy);
    assert!(snapshot.neighbours.contains_key("node-b"));
    assert!(!snapshot.neighbours.contains_key("node-a"));
    assert_eq!(agent.local_report().healthy, Some(true));

    agent.shutdown().await;
    let rounds = agent.rounds_started();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(agent.rounds_started(), rounds);
}
