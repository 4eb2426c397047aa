//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use dual_router::config::ProxyConfig;
use dual_router::http::ProxyServer;
use dual_router::lifecycle::Shutdown;
use dual_router::net::Listener;

/// An address nothing is listening on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Start an HTTPS backend with a throwaway self-signed certificate.
///
/// Every response body reads `backend {method} {path} host={host}`.
pub async fn start_tls_backend() -> SocketAddr {
    let cert = rcgen::generate_simple_self_signed(vec!["backend.invalid".to_string()]).unwrap();
    let tls = RustlsConfig::from_pem(
        cert.cert.pem().into_bytes(),
        cert.key_pair.serialize_pem().into_bytes(),
    )
    .await
    .unwrap();

    let app = Router::new().fallback(|req: Request<Body>| async move {
        let host = req
            .headers()
            .get("host")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_else(|| "-".to_string());
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        (
            [("x-backend", "tls")],
            format!("backend {} {} host={}", req.method(), path, host),
        )
    });

    let handle = axum_server::Handle::new();
    let server_handle = handle.clone();
    tokio::spawn(async move {
        let _ = axum_server::bind_rustls("127.0.0.1:0".parse().unwrap(), tls)
            .handle(server_handle)
            .serve(app.into_make_service())
            .await;
    });
    handle.listening().await.unwrap()
}

/// Start a TCP server that echoes every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// Bytes a mock upstream proxy received on one connection.
pub type Captured = Arc<Mutex<Vec<u8>>>;

/// Start a mock upstream proxy.
///
/// Each connection is read until the end of the request head; the head is
/// recorded and `reply` is written back. The connection then echoes anything
/// else it receives.
pub async fn start_mock_upstream(reply: &'static [u8]) -> (SocketAddr, Captured) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match socket.read(&mut byte).await {
                        Ok(1) => head.push(byte[0]),
                        _ => return,
                    }
                }
                sink.lock().unwrap().extend_from_slice(&head);

                if socket.write_all(reply).await.is_err() {
                    return;
                }
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    (addr, captured)
}

/// Default test configuration pointing at the given backend and upstream.
pub fn config(backend: SocketAddr, upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.routing.designated_host = "myurl.com".to_string();
    config.backend.address = backend.to_string();
    config.upstream.address = upstream.to_string();
    config.timeouts.connect_secs = 2;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// A router running on an ephemeral port.
pub struct RunningRouter {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

/// Start the router with `config` and return its address.
pub async fn start_router(config: ProxyConfig) -> RunningRouter {
    let server = ProxyServer::new(config).unwrap();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, server.config().listener.max_connections).unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });

    RunningRouter { addr, shutdown }
}

/// HTTP client that never consults proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Read from `stream` until `len` bytes arrived or the peer closed.
pub async fn read_n(stream: &mut tokio::net::TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
        }
    }
    buf.truncate(filled);
    buf
}

/// Read from `stream` until `needle` has arrived, the peer closed or five
/// seconds passed.
pub async fn read_until(stream: &mut tokio::net::TcpStream, needle: &[u8]) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(needle.len()).any(|w| w == needle) {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read a complete response from a raw socket until the peer closes.
pub async fn read_to_close(stream: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}
