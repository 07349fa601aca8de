//! Scripted probe for exercising the round and cache logic without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{DEFAULT_CHECK_PATH, DEFAULT_PEER_PORT};
use crate::neighbours::PeerReport;
use crate::outcome::{ErrorKind, Failure, ProbeClock, ProbeOutcome};
use crate::prober::{PeerCheck, Probe};
use crate::target::ProbeTarget;

/// Latency of every scripted probe that is not told to hang
const PROBE_LATENCY: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
enum Behaviour {
    Fail(ErrorKind),
    Hang,
    Report(PeerReport),
}

/// A [`Probe`] whose answers are keyed by target address or peer URL.
///
/// Anything without a script succeeds after a short delay.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: HashMap<String, Behaviour>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn fail(mut self, key: &str, kind: ErrorKind) -> Self {
        self.script.insert(key.to_string(), Behaviour::Fail(kind));
        self
    }

    pub fn hang(mut self, key: &str) -> Self {
        self.script.insert(key.to_string(), Behaviour::Hang);
        self
    }

    pub fn report(mut self, key: &str, report: PeerReport) -> Self {
        self.script.insert(key.to_string(), Behaviour::Report(report));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    async fn run(&self, key: &str) -> (Result<(), Failure>, Option<PeerReport>) {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.script.get(key) {
            Some(Behaviour::Hang) => std::future::pending().await,
            Some(Behaviour::Fail(kind)) => {
                tokio::time::sleep(PROBE_LATENCY).await;
                (Err(Failure::new(*kind, format!("scripted {kind}"))), None)
            }
            Some(Behaviour::Report(report)) => {
                tokio::time::sleep(PROBE_LATENCY).await;
                (Ok(()), Some(report.clone()))
            }
            None => {
                tokio::time::sleep(PROBE_LATENCY).await;
                (Ok(()), None)
            }
        }
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn execute(&self, target: &ProbeTarget) -> ProbeOutcome {
        let clock = ProbeClock::start();
        let (result, _) = self.run(target.address()).await;
        clock.finish(result)
    }

    async fn check_peer(&self, url: &str, _timeout: Duration) -> PeerCheck {
        let clock = ProbeClock::start();
        let (result, report) = self.run(url).await;
        PeerCheck {
            outcome: clock.finish(result),
            report,
        }
    }
}

/// Check URL of a peer at `address` under the default port and path.
pub fn peer_url(address: &str) -> String {
    format!("http://{address}:{DEFAULT_PEER_PORT}{DEFAULT_CHECK_PATH}")
}
