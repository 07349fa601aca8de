//! Error types for constructing and running the mesh agent.
//!
//! Probe failures are never reported through these types; they are captured
//! as data in [`ProbeOutcome`](crate::ProbeOutcome).

use thiserror::Error;

/// Errors that can occur while building or operating the agent.
#[derive(Debug, Error)]
pub enum Error {
    /// The background task was already started
    #[error("already started")]
    AlreadyStarted,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Peer discovery error
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The HTTP client used for probing could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, Error>;
