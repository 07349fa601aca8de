//! Probe targets.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of network check performed against a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Name resolution
    Dns,
    /// Raw TCP connection
    Tcp,
    /// HTTP(S) GET expecting a 200
    Http,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::Tcp => write!(f, "tcp"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// A single thing to check, immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTarget {
    address: String,
    kind: ProbeKind,
    #[serde(with = "crate::serde_duration")]
    timeout: Duration,
}

impl ProbeTarget {
    /// Create a target of the given kind.
    pub fn new(kind: ProbeKind, address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            kind,
            timeout,
        }
    }

    /// Create a DNS target for a host name.
    pub fn dns(name: impl Into<String>, timeout: Duration) -> Self {
        Self::new(ProbeKind::Dns, name, timeout)
    }

    /// Create a TCP target for a `host:port` address.
    pub fn tcp(addr: impl Into<String>, timeout: Duration) -> Self {
        Self::new(ProbeKind::Tcp, addr, timeout)
    }

    /// Create an HTTP target for a URL.
    pub fn http(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(ProbeKind::Http, url, timeout)
    }

    /// Parse a target from its textual form.
    ///
    /// `dns:<name>` and `tcp:<host:port>` select the kind explicitly, anything
    /// with an `http://` or `https://` prefix is an HTTP target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the kind cannot be determined or the
    /// address part is empty.
    pub fn parse(text: &str, timeout: Duration) -> Result<Self> {
        let text = text.trim();

        let (kind, address) = if let Some(name) = text.strip_prefix("dns:") {
            (ProbeKind::Dns, name)
        } else if let Some(addr) = text.strip_prefix("tcp:") {
            (ProbeKind::Tcp, addr)
        } else if text.starts_with("http://") || text.starts_with("https://") {
            (ProbeKind::Http, text)
        } else {
            return Err(Error::Config(format!(
                "cannot determine probe kind of '{text}', expected dns:, tcp:, http:// or https://"
            )));
        };

        if address.is_empty() {
            return Err(Error::Config(format!("target '{text}' has no address")));
        }

        Ok(Self::new(kind, address, timeout))
    }

    /// The address probed: a host name, `host:port`, or URL depending on kind.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The kind of probe.
    #[must_use]
    pub const fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Upper bound on the wall-clock time a probe of this target may take.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.address)
    }
}
