//! Name resolution for DNS targets.

use std::error::Error as StdError;
use std::fmt::Debug;
use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::Resolver;
use thiserror::Error;
use tracing::debug;

/// A failed lookup. A name with no records is not a failure: it resolves to
/// an empty list.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The resolver gave up waiting for an answer
    #[error("lookup timed out: {0}")]
    TimedOut(String),

    /// Any other resolver failure
    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Resolves host names to addresses.
#[async_trait]
pub trait NameResolver
where
    Self: Debug + Send + Sync + 'static,
{
    /// Every address `name` resolves to, of either family.
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, LookupError>;
}

/// Resolver reading the system configuration on every lookup, so answers are
/// never served from a cache shared between lookups.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, LookupError> {
        let resolver = Resolver::tokio_from_system_conf()
            .map_err(|e| LookupError::Failed(format!("failed to create DNS resolver: {e}")))?;

        match resolver.lookup_ip(name).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) if e.is_no_records_found() => {
                debug!(name, "no records found");
                Ok(Vec::new())
            }
            Err(e) => Err(classify_lookup_error(&e)),
        }
    }
}

/// Split resolver errors into timeouts and everything else.
///
/// The resolver reports its own deadline either as an io `TimedOut` somewhere
/// in the source chain or as a "timed out" message.
fn classify_lookup_error(e: &(dyn StdError + 'static)) -> LookupError {
    let mut timed_out = false;
    let mut current = Some(e);
    while let Some(error) = current {
        let io_timeout = error
            .downcast_ref::<io::Error>()
            .is_some_and(|io| io.kind() == io::ErrorKind::TimedOut);
        if io_timeout || error.to_string().contains("timed out") {
            timed_out = true;
            break;
        }
        current = error.source();
    }

    if timed_out {
        LookupError::TimedOut(e.to_string())
    } else {
        LookupError::Failed(e.to_string())
    }
}
