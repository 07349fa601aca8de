//! Probe outcomes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Category of a probe failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The probe succeeded
    #[default]
    None,
    /// The deadline was hit
    Timeout,
    /// Connection refused, reset or unreachable
    Connection,
    /// Malformed response
    Protocol,
    /// Name resolved to zero usable addresses
    DnsEmpty,
    /// HTTP status other than 200
    BadStatus,
    /// Malformed target address or unsupported URL scheme
    Parse,
}

impl ErrorKind {
    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::DnsEmpty => "dns-empty",
            Self::BadStatus => "bad-status",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one probe. Created fresh by every probe and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Whether the target was reachable
    pub ok: bool,
    /// Failure category, `None` when `ok`
    pub error_kind: ErrorKind,
    /// Human readable failure detail, empty when `ok`
    pub error_detail: String,
    /// Wall-clock time the probe started
    pub started_at: DateTime<Utc>,
    /// Time the probe took
    #[serde(with = "crate::serde_duration")]
    pub duration: Duration,
}

impl ProbeOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn success(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            ok: true,
            error_kind: ErrorKind::None,
            error_detail: String::new(),
            started_at,
            duration,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failure(
        error_kind: ErrorKind,
        error_detail: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            ok: false,
            error_kind,
            error_detail: error_detail.into(),
            started_at,
            duration,
        }
    }
}

/// A categorized probe failure before it is stamped with timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Failure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timed out after {}", crate::serde_duration::format(after)),
        )
    }
}

/// Captures when a probe started so its outcome can be stamped.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProbeClock {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl ProbeClock {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self, result: Result<(), Failure>) -> ProbeOutcome {
        let duration = self.elapsed();
        match result {
            Ok(()) => ProbeOutcome::success(self.started_at, duration),
            Err(failure) => {
                ProbeOutcome::failure(failure.kind, failure.detail, self.started_at, duration)
            }
        }
    }
}
