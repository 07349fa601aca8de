//! Loopback servers for exercising real probes.
//!
//! Every server binds an ephemeral port on 127.0.0.1 and runs until the test
//! runtime shuts down.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

/// Router answering every path with `status` and `body`.
fn fixed_response(status: u16, body: String) -> Router {
    let status = StatusCode::from_u16(status).expect("valid status code");
    Router::new().fallback(move || {
        let body = body.clone();
        async move { (status, body) }
    })
}

/// Serve every request with `status` and `body` over plain HTTP.
pub async fn spawn_http(status: u16, body: impl Into<String>) -> SocketAddr {
    let router = fixed_response(status, body.into());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should bind to port");
    let addr = listener.local_addr().expect("Should have local address");

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("HTTP server should run");
    });

    addr
}

/// Serve every request with `status` and `body` over HTTPS, using a
/// self-signed certificate no client trusts.
pub async fn spawn_https(status: u16, body: impl Into<String>) -> SocketAddr {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let config = RustlsConfig::from_pem_file(
        fixtures.join("self-signed.cert.pem"),
        fixtures.join("self-signed.key.pem"),
    )
    .await
    .expect("Should load TLS fixtures");

    let router = fixed_response(status, body.into());
    let handle = Handle::new();
    let server = axum_server::bind_rustls(SocketAddr::from(([127, 0, 0, 1], 0)), config)
        .handle(handle.clone());

    tokio::spawn(async move {
        server
            .serve(router.into_make_service())
            .await
            .expect("HTTPS server should run");
    });

    handle.listening().await.expect("HTTPS server should listen")
}

/// Accept connections and never answer.
pub async fn spawn_silent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll `check` until it returns true or `limit` passes.
pub async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
