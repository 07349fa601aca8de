//! The probe executor: one network check against one target.
//!
//! Every probe is bounded by its target's timeout and reports failure as a
//! categorized [`ProbeOutcome`] rather than an error.

use std::error::Error as StdError;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::IpVersion;
use crate::error::Result;
use crate::neighbours::PeerReport;
use crate::outcome::{ErrorKind, Failure, ProbeClock, ProbeOutcome};
use crate::resolver::{LookupError, NameResolver, SystemResolver};
use crate::target::{ProbeKind, ProbeTarget};

/// Result of checking a peer's check endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerCheck {
    /// Reachability of the peer
    pub outcome: ProbeOutcome,
    /// What the peer reported about itself, if anything
    pub report: Option<PeerReport>,
}

/// Something that can perform network checks.
#[async_trait]
pub trait Probe
where
    Self: Send + Sync + 'static,
{
    /// Check one target, never taking longer than its timeout.
    async fn execute(&self, target: &ProbeTarget) -> ProbeOutcome;

    /// GET a peer's check endpoint, never taking longer than `timeout`.
    async fn check_peer(&self, url: &str, timeout: Duration) -> PeerCheck;
}

/// Probe implementation backed by a name resolver, raw sockets and an HTTP
/// client.
#[derive(Clone, Debug)]
pub struct Prober {
    client: Client,
    ip_version: IpVersion,
    resolver: Arc<dyn NameResolver>,
}

impl Prober {
    /// Create a prober resolving addresses of the given IP family.
    ///
    /// Certificate validation is disabled for HTTPS targets: probes measure
    /// reachability and status, not trust. Connections are never pooled and
    /// never proxied so every probe exercises the direct network path.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(ip_version: IpVersion) -> Result<Self> {
        Self::with_resolver(ip_version, Arc::new(SystemResolver))
    }

    /// Create a prober answering DNS targets from `resolver`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_resolver(ip_version: IpVersion, resolver: Arc<dyn NameResolver>) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            ip_version,
            resolver,
        })
    }

    async fn probe_dns(&self, addr: &str) -> std::result::Result<(), Failure> {
        let resolved = self.resolver.lookup_ip(addr).await.map_err(|e| match e {
            LookupError::TimedOut(detail) => Failure::new(ErrorKind::Timeout, detail),
            LookupError::Failed(detail) => Failure::new(ErrorKind::Connection, detail),
        })?;

        let ips = usable_addresses(addr, &resolved, self.ip_version)?;
        info!(
            addr,
            resolved_ips = ?ips,
            ip_count = ips.len(),
            "DNS probe successful"
        );
        Ok(())
    }

    async fn probe_tcp(&self, addr: &str) -> std::result::Result<(), Failure> {
        if !has_port(addr) {
            return Err(Failure::new(
                ErrorKind::Parse,
                format!("'{addr}' is not a host:port address"),
            ));
        }

        let candidates: Vec<SocketAddr> = lookup_host(addr)
            .await
            .map_err(|e| Failure::new(io_error_kind(&e), format!("failed to resolve {addr}: {e}")))?
            .filter(|candidate| self.ip_version.matches(&candidate.ip()))
            .collect();

        if candidates.is_empty() {
            return Err(Failure::new(
                ErrorKind::Connection,
                format!("{addr} has no {} address", self.ip_version),
            ));
        }

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    info!(
                        addr,
                        local_addr = ?stream.local_addr().ok(),
                        remote_addr = %candidate,
                        "TCP probe successful"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(addr, remote_addr = %candidate, error = %e, "TCP connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or_else(
            || Failure::new(ErrorKind::Connection, format!("could not connect to {addr}")),
            |e| Failure::new(io_error_kind(&e), e.to_string()),
        ))
    }

    async fn probe_http(&self, addr: &str, timeout: Duration) -> std::result::Result<(), Failure> {
        let url = parse_http_url(addr)?;
        debug!(
            addr,
            scheme = url.scheme(),
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "sending HTTP GET"
        );

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;

        let status = response.status();
        debug!(
            addr,
            status_code = status.as_u16(),
            version = ?response.version(),
            content_length = ?response.content_length(),
            "HTTP probe received response"
        );

        if status != StatusCode::OK {
            return Err(Failure::new(
                ErrorKind::BadStatus,
                status.as_u16().to_string(),
            ));
        }

        info!(addr, status_code = status.as_u16(), "HTTP probe successful");
        Ok(())
    }

    async fn fetch_peer(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<Option<PeerReport>, Failure> {
        let url = parse_http_url(url)?;

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Failure::new(
                ErrorKind::BadStatus,
                status.as_u16().to_string(),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_http_error(&e))?;

        parse_peer_report(&body)
    }
}

#[async_trait]
impl Probe for Prober {
    async fn execute(&self, target: &ProbeTarget) -> ProbeOutcome {
        let addr = target.address();
        let timeout = target.timeout();
        debug!(
            addr,
            kind = %target.kind(),
            timeout_ms = timeout.as_millis(),
            "starting probe"
        );

        let clock = ProbeClock::start();
        let probe = async {
            match target.kind() {
                ProbeKind::Dns => self.probe_dns(addr).await,
                ProbeKind::Tcp => self.probe_tcp(addr).await,
                ProbeKind::Http => self.probe_http(addr, timeout).await,
            }
        };

        let result = tokio::time::timeout(timeout, probe)
            .await
            .unwrap_or_else(|_| Err(Failure::timeout(timeout)));
        let outcome = clock.finish(result);

        if !outcome.ok {
            warn!(
                addr,
                kind = %target.kind(),
                error_kind = %outcome.error_kind,
                error = %outcome.error_detail,
                duration_ms = outcome.duration.as_millis(),
                "probe failed"
            );
        }

        outcome
    }

    async fn check_peer(&self, url: &str, timeout: Duration) -> PeerCheck {
        let clock = ProbeClock::start();

        let result = tokio::time::timeout(timeout, self.fetch_peer(url, timeout))
            .await
            .unwrap_or_else(|_| Err(Failure::timeout(timeout)));

        let (result, report) = match result {
            Ok(report) => (Ok(()), report),
            Err(failure) => (Err(failure), None),
        };
        let outcome = clock.finish(result);

        debug!(
            url,
            ok = outcome.ok,
            error_kind = %outcome.error_kind,
            duration_ms = outcome.duration.as_millis(),
            "peer check finished"
        );

        PeerCheck { outcome, report }
    }
}

/// Filter resolved addresses to the configured family.
///
/// A name that resolves to nothing usable is a `DnsEmpty` failure, which is
/// distinct from a resolver error or timeout.
fn usable_addresses(
    addr: &str,
    resolved: &[IpAddr],
    ip_version: IpVersion,
) -> std::result::Result<Vec<IpAddr>, Failure> {
    let ips: Vec<IpAddr> = resolved
        .iter()
        .copied()
        .filter(|ip| ip_version.matches(ip))
        .collect();

    if ips.is_empty() {
        return Err(Failure::new(
            ErrorKind::DnsEmpty,
            format!("{addr} was resolved to 0 {ip_version} addresses"),
        ));
    }

    Ok(ips)
}

fn has_port(addr: &str) -> bool {
    addr.rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}

fn parse_http_url(addr: &str) -> std::result::Result<Url, Failure> {
    let url = Url::parse(addr)
        .map_err(|e| Failure::new(ErrorKind::Parse, format!("invalid url '{addr}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Failure::new(
            ErrorKind::Parse,
            format!("invalid url scheme: '{scheme}' in address"),
        )),
    }
}

fn parse_peer_report(body: &[u8]) -> std::result::Result<Option<PeerReport>, Failure> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(body).map(Some).map_err(|e| {
        Failure::new(
            ErrorKind::Protocol,
            format!("malformed peer report: {e}"),
        )
    })
}

fn io_error_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        _ => ErrorKind::Connection,
    }
}

fn classify_http_error(e: &reqwest::Error) -> Failure {
    let kind = if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_builder() {
        ErrorKind::Parse
    } else if e.is_connect() {
        ErrorKind::Connection
    } else if e.is_decode() || e.is_body() || e.is_redirect() {
        ErrorKind::Protocol
    } else {
        ErrorKind::Connection
    };

    Failure::new(kind, error_chain(e))
}

/// Render an error with all its sources, `outer: inner: root`.
fn error_chain(e: &dyn StdError) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_zero_addresses_is_dns_empty() {
        let failure = usable_addresses("empty.example", &[], IpVersion::V4).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::DnsEmpty);
        assert!(failure.detail.contains("empty.example"));
    }

    #[test]
    fn test_wrong_family_is_dns_empty() {
        let resolved = [IpAddr::V6(Ipv6Addr::LOCALHOST)];
        let failure = usable_addresses("v6only.example", &resolved, IpVersion::V4).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::DnsEmpty);

        let ips = usable_addresses("v6only.example", &resolved, IpVersion::V6).unwrap();
        assert_eq!(ips, resolved.to_vec());
    }

    #[test]
    fn test_family_filter_keeps_matching() {
        let resolved = [
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ];
        let ips = usable_addresses("dual.example", &resolved, IpVersion::V4).unwrap();
        assert_eq!(ips.len(), 2);
    }

    #[test]
    fn test_http_url_scheme_validation() {
        assert!(parse_http_url("http://example.com").is_ok());
        assert!(parse_http_url("https://example.com/x").is_ok());

        let failure = parse_http_url("ftp://example.com").unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Parse);
        assert!(failure.detail.contains("ftp"));

        assert_eq!(
            parse_http_url("not a url").unwrap_err().kind,
            ErrorKind::Parse
        );
    }

    #[test]
    fn test_has_port() {
        assert!(has_port("10.0.0.1:443"));
        assert!(has_port("[::1]:80"));
        assert!(has_port("example.com:8080"));
        assert!(!has_port("example.com"));
        assert!(!has_port(":80"));
        assert!(!has_port("example.com:http"));
    }

    #[test]
    fn test_peer_report_body() {
        assert_eq!(parse_peer_report(b"").unwrap(), None);
        assert_eq!(parse_peer_report(b" \n").unwrap(), None);

        let report = parse_peer_report(
            br#"{"node_id":"node-b","boot_time":"2024-01-01T00:00:00Z","healthy":true}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(report.node_id, "node-b");
        assert_eq!(report.healthy, Some(true));

        let failure = parse_peer_report(b"<html>").unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Protocol);
    }

    #[derive(Debug)]
    struct FixedResolver(std::result::Result<Vec<IpAddr>, LookupError>);

    #[async_trait]
    impl NameResolver for FixedResolver {
        async fn lookup_ip(&self, _name: &str) -> std::result::Result<Vec<IpAddr>, LookupError> {
            self.0.clone()
        }
    }

    async fn resolve_with(
        answer: std::result::Result<Vec<IpAddr>, LookupError>,
        ip_version: IpVersion,
    ) -> ProbeOutcome {
        let prober = Prober::with_resolver(ip_version, Arc::new(FixedResolver(answer))).unwrap();
        prober
            .execute(&ProbeTarget::dns("svc.example", Duration::from_secs(1)))
            .await
    }

    #[tokio::test]
    async fn test_dns_no_records_is_dns_empty() {
        let outcome = resolve_with(Ok(Vec::new()), IpVersion::V4).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error_kind, ErrorKind::DnsEmpty);
        assert!(outcome.error_detail.contains("svc.example"));
    }

    #[tokio::test]
    async fn test_dns_other_family_only_is_dns_empty() {
        let answer = Ok(vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]);
        let outcome = resolve_with(answer, IpVersion::V4).await;
        assert_eq!(outcome.error_kind, ErrorKind::DnsEmpty);
    }

    #[tokio::test]
    async fn test_dns_resolver_timeout_is_timeout() {
        let answer = Err(LookupError::TimedOut("request timed out".to_string()));
        let outcome = resolve_with(answer, IpVersion::V4).await;
        assert_eq!(outcome.error_kind, ErrorKind::Timeout);
        assert_eq!(outcome.error_detail, "request timed out");
    }

    #[tokio::test]
    async fn test_dns_resolver_failure_is_connection() {
        let answer = Err(LookupError::Failed("no connections available".to_string()));
        let outcome = resolve_with(answer, IpVersion::V4).await;
        assert_eq!(outcome.error_kind, ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_dns_success() {
        let answer = Ok(vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        ]);
        let outcome = resolve_with(answer, IpVersion::V6).await;
        assert!(outcome.ok);
        assert_eq!(outcome.error_kind, ErrorKind::None);
    }

    #[tokio::test]
    async fn test_parse_failures_do_not_touch_network() {
        let prober = Prober::new(IpVersion::V4).unwrap();

        let outcome = prober
            .execute(&ProbeTarget::http("gopher://example.com", Duration::from_secs(1)))
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error_kind, ErrorKind::Parse);

        let outcome = prober
            .execute(&ProbeTarget::tcp("example.com", Duration::from_secs(1)))
            .await;
        assert_eq!(outcome.error_kind, ErrorKind::Parse);
    }
}
