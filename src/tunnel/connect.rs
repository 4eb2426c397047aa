//! CONNECT tunnel establishment.
//!
//! # State Machine
//! ```text
//! CONNECT host:port
//!     ├─ host has the designated prefix ─▶ Direct
//!     │     dial backend ─fail─▶ 503, no hijack
//!     │     hijack ─fail─▶ 500, backend socket closed
//!     │     write "200 Connection Established" ─▶ relay
//!     └─ otherwise ─▶ Forwarded
//!           dial upstream proxy ─fail─▶ 503, no hijack
//!           replay CONNECT line + headers ─fail─▶ 503 (error text), no hijack
//!           hijack ─fail─▶ 500, upstream socket closed
//!           relay (the upstream answers the client itself)
//! ```
//!
//! A CONNECT that arrives on a connection already served by the HTTP server
//! ([`TunnelEstablisher::establish_served`]) follows the same branches, but
//! the server writes the reply and releases the socket afterwards. On the
//! forwarded branch the upstream's reply head is read and handed to the
//! server; a non-2xx reply ends there without a tunnel.
//!
//! # Design Decisions
//! - Only the direct branch confirms the tunnel locally; on a raw connection
//!   the forwarded branch never reads the upstream's reply
//! - Any remote socket opened before a failure is dropped, which closes it
//! - No retries

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use hyper::ext::ReasonPhrase;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::request::{HeadError, RequestHead};
use crate::http::response::ResponseHead;
use crate::net::Prebuffered;
use crate::observability::metrics;
use crate::routing::{request_host, Router, TunnelBranch};
use crate::tunnel::hijack::{HijackError, Hijacker, PendingUpgrade, ServedConnection};
use crate::tunnel::relay::{self, Tunnel};

/// Confirmation written to the client when a direct tunnel is ready.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Largest upstream reply head accepted on a served connection.
const MAX_REPLY_HEAD: usize = 16 * 1024;

/// Largest body kept from a refusing upstream reply.
const MAX_REPLY_BODY: usize = 64 * 1024;

/// Errors while setting up a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Error connecting to target: {0}")]
    BackendDial(#[source] io::Error),

    #[error("Error connecting to upstream proxy: {0}")]
    UpstreamDial(#[source] io::Error),

    /// Replaying the CONNECT handshake to the upstream proxy failed.
    #[error("{0}")]
    Handshake(#[source] io::Error),

    #[error(transparent)]
    Hijack(#[from] HijackError),

    /// The upstream proxy answered the handshake with something unreadable.
    #[error("Invalid reply from upstream proxy: {0}")]
    UpstreamReply(#[source] HeadError),

    /// Writing the confirmation after hijack failed; the client is gone.
    #[error("failed to confirm tunnel: {0}")]
    Confirm(#[source] io::Error),
}

impl TunnelError {
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::Hijack(err) => err.status(),
            TunnelError::UpstreamReply(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        (self.status(), format!("{self}\n")).into_response()
    }
}

/// The parts of a CONNECT request needed to open a tunnel.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Authority-form target (`host:port`).
    pub target: String,
    /// Protocol token from the request line, e.g. `HTTP/1.1`.
    pub version: String,
    /// Header lines in received order.
    pub headers: Vec<(String, Bytes)>,
    host: Option<String>,
}

impl ConnectRequest {
    /// Build from a head read off a raw connection (original header spelling).
    pub fn from_head(head: &RequestHead) -> Self {
        Self {
            target: head.target.clone(),
            version: head.version().to_string(),
            headers: head
                .headers
                .iter()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect(),
            host: head.host().map(str::to_string),
        }
    }

    /// Build from a request parsed by the HTTP server.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = request_host(req.uri(), req.headers()).map(str::to_string);
        Self {
            target: req
                .uri()
                .authority()
                .map(|authority| authority.to_string())
                .unwrap_or_else(|| req.uri().to_string()),
            version: format!("{:?}", req.version()),
            headers: req
                .headers()
                .iter()
                .map(|(name, value)| {
                    (name.as_str().to_string(), Bytes::copy_from_slice(value.as_bytes()))
                })
                .collect(),
            host,
        }
    }

    /// Host used to pick the tunnel branch.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The CONNECT handshake as the upstream proxy expects it.
    pub fn handshake(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_slice(b"CONNECT ");
        buf.put_slice(self.target.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.version.as_bytes());
        buf.put_slice(b"\r\n");
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

/// A tunnel set up on a connection owned by the HTTP server.
#[derive(Debug)]
pub struct ServedTunnel {
    /// Reply for the server to write to the client.
    pub response: Response,
    /// Relay task, started once the server releases the socket. `None` when
    /// the upstream proxy refused the tunnel.
    pub relay: Option<JoinHandle<()>>,
}

/// Opens CONNECT tunnels to the backend or through the upstream proxy.
#[derive(Debug, Clone)]
pub struct TunnelEstablisher {
    router: Router,
    backend_address: String,
    upstream_address: String,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl TunnelEstablisher {
    pub fn new(
        router: Router,
        backend_address: impl Into<String>,
        upstream_address: impl Into<String>,
        connect_timeout: Duration,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            router,
            backend_address: backend_address.into(),
            upstream_address: upstream_address.into(),
            connect_timeout,
            idle_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig, router: Router) -> Self {
        Self::new(
            router,
            config.backend.address.as_str(),
            config.upstream.address.as_str(),
            config.timeouts.connect(),
            config.timeouts.tunnel_idle(),
        )
    }

    /// Open a tunnel for `request`, taking over `client` on success.
    ///
    /// On error the client has not been hijacked unless the error is
    /// [`TunnelError::Confirm`]; callers answer with [`TunnelError::status`].
    pub async fn establish<H>(&self, request: &ConnectRequest, client: &mut H) -> Result<Tunnel, TunnelError>
    where
        H: Hijacker + Send,
    {
        let branch = self.router.tunnel_branch(request.host());
        tracing::debug!(target = %request.target, branch = %branch, "Establishing tunnel");

        let result = match branch {
            TunnelBranch::Direct => self.open_direct(client).await,
            TunnelBranch::Forwarded => self.open_forwarded(request, client).await,
        };

        record_outcome(request, branch, result.as_ref().map(|_| true));
        result
    }

    /// Open a tunnel for a CONNECT request the HTTP server already parsed.
    ///
    /// The server writes [`ServedTunnel::response`]; the relay starts after
    /// hyper hands over the socket and runs until either side closes.
    pub async fn establish_served(
        &self,
        request: &ConnectRequest,
        client: &mut ServedConnection,
    ) -> Result<ServedTunnel, TunnelError> {
        let branch = self.router.tunnel_branch(request.host());
        tracing::debug!(target = %request.target, branch = %branch, "Establishing tunnel on served connection");

        let result = match branch {
            TunnelBranch::Direct => self.serve_direct(request, client).await,
            TunnelBranch::Forwarded => self.serve_forwarded(request, client).await,
        };

        record_outcome(request, branch, result.as_ref().map(|tunnel| tunnel.relay.is_some()));
        result
    }

    async fn open_direct<H>(&self, client: &mut H) -> Result<Tunnel, TunnelError>
    where
        H: Hijacker + Send,
    {
        let remote = self
            .dial(&self.backend_address)
            .await
            .map_err(TunnelError::BackendDial)?;

        let mut client_io = client.hijack()?;
        client_io
            .write_all(CONNECTION_ESTABLISHED)
            .await
            .map_err(TunnelError::Confirm)?;

        Ok(relay::splice(client_io, remote, self.idle_timeout))
    }

    async fn open_forwarded<H>(&self, request: &ConnectRequest, client: &mut H) -> Result<Tunnel, TunnelError>
    where
        H: Hijacker + Send,
    {
        let mut remote = self
            .dial(&self.upstream_address)
            .await
            .map_err(TunnelError::UpstreamDial)?;

        remote
            .write_all(&request.handshake())
            .await
            .map_err(TunnelError::Handshake)?;

        let client_io = client.hijack()?;
        Ok(relay::splice(client_io, remote, self.idle_timeout))
    }

    async fn serve_direct(
        &self,
        request: &ConnectRequest,
        client: &mut ServedConnection,
    ) -> Result<ServedTunnel, TunnelError> {
        let remote = self
            .dial(&self.backend_address)
            .await
            .map_err(TunnelError::BackendDial)?;

        let upgrade = client.hijack()?;
        let mut response = Response::new(Body::empty());
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(b"Connection Established"));

        Ok(ServedTunnel {
            response,
            relay: Some(self.spawn_relay(&request.target, upgrade, remote)),
        })
    }

    async fn serve_forwarded(
        &self,
        request: &ConnectRequest,
        client: &mut ServedConnection,
    ) -> Result<ServedTunnel, TunnelError> {
        let mut remote = self
            .dial(&self.upstream_address)
            .await
            .map_err(TunnelError::UpstreamDial)?;

        remote
            .write_all(&request.handshake())
            .await
            .map_err(TunnelError::Handshake)?;

        let mut remote = Prebuffered::new(remote, MAX_REPLY_HEAD);
        let head = match tokio::time::timeout(self.connect_timeout, ResponseHead::read(&mut remote)).await {
            Ok(head) => head.map_err(TunnelError::UpstreamReply)?,
            Err(_) => {
                return Err(TunnelError::Handshake(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "upstream proxy did not answer the handshake",
                )))
            }
        };

        if !head.status.is_success() {
            tracing::debug!(target = %request.target, status = %head.status, "Upstream proxy refused tunnel");
            let body = self.read_reply_body(&mut remote, head.content_length()).await;
            return Ok(ServedTunnel {
                response: head.into_response(body),
                relay: None,
            });
        }

        let upgrade = client.hijack()?;
        Ok(ServedTunnel {
            response: head.into_response(Bytes::new()),
            relay: Some(self.spawn_relay(&request.target, upgrade, remote)),
        })
    }

    /// Body of a refusing upstream reply; empty unless it carries a
    /// `Content-Length` and arrives within the connect timeout.
    async fn read_reply_body<S>(&self, remote: &mut Prebuffered<S>, len: Option<usize>) -> Bytes
    where
        S: AsyncRead + Unpin,
    {
        let mut body = vec![0u8; len.unwrap_or(0).min(MAX_REPLY_BODY)];
        match tokio::time::timeout(self.connect_timeout, remote.read_exact(&mut body)).await {
            Ok(Ok(_)) => Bytes::from(body),
            _ => Bytes::new(),
        }
    }

    fn spawn_relay<R>(&self, target: &str, upgrade: PendingUpgrade, remote: R) -> JoinHandle<()>
    where
        R: AsyncRead + AsyncWrite + Send + 'static,
    {
        let target = target.to_string();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(
            async move {
                let client_io = match upgrade.wait().await {
                    Ok(io) => io,
                    Err(err) => {
                        tracing::warn!(target = %target, error = %err, "Client was not handed over");
                        return;
                    }
                };
                let stats = relay::splice(client_io, remote, idle_timeout).join().await;
                tracing::info!(
                    target = %target,
                    client_to_remote = stats.client_to_remote,
                    remote_to_client = stats.remote_to_client,
                    "Tunnel closed"
                );
            }
            .in_current_span(),
        )
    }

    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(stream) => stream,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            )),
        }
    }
}

/// Log and count how a tunnel attempt ended. `Ok(false)` means the upstream
/// proxy refused it.
fn record_outcome(request: &ConnectRequest, branch: TunnelBranch, result: Result<bool, &TunnelError>) {
    match result {
        Ok(true) => {
            tracing::info!(target = %request.target, branch = %branch, "Tunnel established");
            metrics::record_tunnel(branch.as_str(), "established");
        }
        Ok(false) => {
            tracing::info!(target = %request.target, branch = %branch, "Tunnel refused by upstream proxy");
            metrics::record_tunnel(branch.as_str(), "refused");
        }
        Err(err) => {
            tracing::warn!(target = %request.target, branch = %branch, error = %err, "Tunnel failed");
            metrics::record_tunnel(branch.as_str(), "failed");
        }
    }
}
