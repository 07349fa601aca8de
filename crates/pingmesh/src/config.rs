//! Agent configuration.
//!
//! An [`AgentConfig`] is resolved once by the host process and handed to each
//! component's constructor. Nothing in the crate reads settings from a global.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::target::ProbeTarget;

/// Default interval between external target refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between neighbour rounds
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for a single peer check
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(300);

/// Default deadline for a whole neighbour round
pub const DEFAULT_CHECK_ALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default port of the peers' check endpoint
pub const DEFAULT_PEER_PORT: u16 = 8080;

/// Default path of the peers' check endpoint
pub const DEFAULT_CHECK_PATH: &str = "/ping";

/// IP family used when resolving probe targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IpVersion {
    /// IPv4
    #[default]
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Whether `ip` belongs to this family.
    #[must_use]
    pub const fn matches(self, ip: &IpAddr) -> bool {
        match self {
            Self::V4 => ip.is_ipv4(),
            Self::V6 => ip.is_ipv6(),
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::V4),
            6 => Ok(Self::V6),
            other => Err(format!(
                "unknown IP version {other}: expected values are 4 or 6"
            )),
        }
    }
}

impl From<IpVersion> for u8 {
    fn from(value: IpVersion) -> Self {
        match value {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl FromStr for IpVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid IP version '{s}'"))?;
        Self::try_from(value)
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

/// Configuration for the mesh agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity of this instance; the peer with this ID is never checked
    pub node_id: String,

    /// External targets probed by the background cache
    pub external_targets: Vec<ProbeTarget>,

    /// Interval at which external targets are re-probed
    #[serde(with = "crate::serde_duration")]
    pub refresh_interval: Duration,

    /// Interval at which neighbour rounds run
    #[serde(with = "crate::serde_duration")]
    pub update_interval: Duration,

    /// Timeout for checking a single peer
    #[serde(with = "crate::serde_duration")]
    pub check_timeout: Duration,

    /// Deadline for checking all peers in one round
    #[serde(with = "crate::serde_duration")]
    pub check_all_timeout: Duration,

    /// IP family used for DNS and TCP probes
    pub ip_version: IpVersion,

    /// Port of the peers' check endpoint
    pub peer_port: u16,

    /// Path of the peers' check endpoint
    pub check_path: String,

    /// Number of peers to check per round, 0 checks every peer
    pub ping_number: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            external_targets: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            check_all_timeout: DEFAULT_CHECK_ALL_TIMEOUT,
            ip_version: IpVersion::default(),
            peer_port: DEFAULT_PEER_PORT,
            check_path: DEFAULT_CHECK_PATH.to_string(),
            ping_number: 0,
        }
    }
}

impl AgentConfig {
    /// Check the configuration for values the agent cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("refresh_interval", self.refresh_interval),
            ("update_interval", self.update_interval),
            ("check_timeout", self.check_timeout),
            ("check_all_timeout", self.check_all_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.peer_port == 0 {
            return Err(Error::Config("peer_port must not be 0".to_string()));
        }

        if !self.check_path.starts_with('/') {
            return Err(Error::Config(format!(
                "check_path '{}' must start with '/'",
                self.check_path
            )));
        }

        for target in &self.external_targets {
            if target.address().trim().is_empty() {
                return Err(Error::Config(format!(
                    "{} target has an empty address",
                    target.kind()
                )));
            }
            if target.timeout().is_zero() {
                return Err(Error::Config(format!(
                    "target '{}' has a zero timeout",
                    target.address()
                )));
            }
        }

        if self.check_timeout > self.check_all_timeout {
            warn!(
                check_timeout_ms = self.check_timeout.as_millis(),
                check_all_timeout_ms = self.check_all_timeout.as_millis(),
                "check_timeout exceeds check_all_timeout, the round deadline will cut peer checks short"
            );
        }

        Ok(())
    }
}
