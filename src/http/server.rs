//! Connection serving and request dispatch.
//!
//! # Responsibilities
//! - Accept connections under the listener's connection limit
//! - Read the first request head of every connection
//! - Hand CONNECT connections to the tunnel establisher as raw sockets
//! - Serve everything else with hyper's HTTP/1.1 server and the Axum app,
//!   upgrading the connection when a later request is a CONNECT
//! - Dispatch HTTP requests to the direct or upstream proxy
//! - Drain live connections on shutdown

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Extension, Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::direct::DirectProxy;
use crate::http::forward::UpstreamProxy;
use crate::http::request::RequestHead;
use crate::http::response::write_plain_response;
use crate::net::{ConnectionTracker, Listener, ListenerError, Prebuffered};
use crate::observability::metrics;
use crate::routing::{Route, Router as ProxyRouter};
use crate::tunnel::{ConnectRequest, Hijacker, RawClient, ServedConnection, TunnelEstablisher};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub direct: DirectProxy,
    pub upstream: UpstreamProxy,
    pub tunnels: Arc<TunnelEstablisher>,
}

/// Relay tasks started on one served connection. The connection stays
/// counted until all of them finish.
#[derive(Clone)]
struct ServedTunnels(mpsc::UnboundedSender<JoinHandle<()>>);

/// The dual-mode HTTP/HTTPS router.
pub struct ProxyServer {
    app: Router,
    router: Arc<ProxyRouter>,
    tunnels: Arc<TunnelEstablisher>,
    config: Arc<ProxyConfig>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let router = Arc::new(ProxyRouter::from_config(&config.routing));
        let tunnels = Arc::new(TunnelEstablisher::from_config(&config, (*router).clone()));

        let state = AppState {
            router: Arc::clone(&router),
            direct: DirectProxy::new(&config)?,
            upstream: UpstreamProxy::new(&config)?,
            tunnels: Arc::clone(&tunnels),
        };
        let app = Self::build_app(&config, state);

        Ok(Self {
            app,
            router,
            tunnels,
            config: Arc::new(config),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build the Axum app serving plain HTTP requests.
    #[allow(deprecated)]
    fn build_app(config: &ProxyConfig, state: AppState) -> Router {
        let mut app = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .fallback(proxy_handler)
            .with_state(state);

        if let Some(timeout) = config.timeouts.request() {
            app = app.layer(TimeoutLayer::new(timeout));
        }
        app.layer(TraceLayer::new_for_http())
    }

    /// The Axum app, for serving HTTP without the raw connection layer.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept and serve connections until `shutdown` fires, then wait for
    /// live connections to drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            designated_host = %self.router.designated_host(),
            backend = %self.config.backend.address,
            upstream = %self.config.upstream.address,
            "Router accepting connections"
        );

        loop {
            let (stream, peer, permit) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(err)) => {
                        tracing::warn!(error = %err, "Accept failed");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
            };

            let guard = self.tracker.track();
            let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);
            let connection = ConnectionHandler {
                app: self.app.clone(),
                router: Arc::clone(&self.router),
                tunnels: Arc::clone(&self.tunnels),
                max_header_bytes: self.config.listener.max_header_bytes,
            };

            tokio::spawn(
                async move {
                    connection.serve(stream).await;
                    drop(guard);
                    drop(permit);
                }
                .instrument(span),
            );
        }

        let active = self.tracker.active_count();
        tracing::info!(active, "Stopped accepting connections, draining");
        if !self
            .tracker
            .wait_for_drain(self.config.timeouts.shutdown_grace())
            .await
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Grace period elapsed with connections still open"
            );
        }

        tracing::info!("Router stopped");
        Ok(())
    }
}

/// Per-connection serving state.
struct ConnectionHandler {
    app: Router,
    router: Arc<ProxyRouter>,
    tunnels: Arc<TunnelEstablisher>,
    max_header_bytes: usize,
}

impl ConnectionHandler {
    async fn serve(self, stream: TcpStream) {
        let mut io = Prebuffered::new(stream, self.max_header_bytes);

        let head = match RequestHead::peek(&mut io).await {
            Ok(head) => head,
            Err(err) => {
                tracing::debug!(error = %err, "Unreadable first request");
                if let Some(status) = err.status() {
                    let _ = write_plain_response(&mut io, status, &err.to_string()).await;
                }
                return;
            }
        };

        match self.router.route(&head.method, head.host()) {
            Route::Connect => {
                io.discard(head.len);
                self.tunnel(&head, io).await;
            }
            route => {
                tracing::trace!(route = %route, "Serving HTTP connection");
                self.serve_http(io).await;
            }
        }
    }

    async fn tunnel<S>(&self, head: &RequestHead, io: Prebuffered<S>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let request = ConnectRequest::from_head(head);
        let mut client = RawClient::new(io);

        match self.tunnels.establish(&request, &mut client).await {
            Ok(tunnel) => {
                let stats = tunnel.join().await;
                tracing::info!(
                    target = %request.target,
                    client_to_remote = stats.client_to_remote,
                    remote_to_client = stats.remote_to_client,
                    "Tunnel closed"
                );
            }
            Err(err) if !client.is_hijacked() => {
                let _ = client.respond(err.status(), &err.to_string()).await;
            }
            Err(_) => {}
        }
    }

    async fn serve_http<S>(self, io: Prebuffered<S>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (relays, mut pending) = mpsc::unbounded_channel();
        let service = TowerToHyperService::new(self.app.layer(Extension(ServedTunnels(relays))));
        if let Err(err) = http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await
        {
            tracing::debug!(error = %err, "HTTP connection ended with error");
        }

        // The service and every sender in it are gone once the connection ends.
        while let Some(relay) = pending.recv().await {
            let _ = relay.await;
        }
    }
}

/// Dispatch one HTTP request by route.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let route = state.router.route_request(&request);

    let response = match route {
        Route::Direct => state.direct.proxy(request).await,
        Route::Upstream => state.upstream.proxy(request).await,
        Route::Connect => Ok(serve_connect(&state, request).await),
    };

    let response = response.unwrap_or_else(|err| {
        tracing::warn!(route = %route, error = %err, "Proxy request failed");
        err.into_response()
    });
    metrics::record_request(route.as_str(), response.status().as_u16(), start);
    response
}

/// Tunnel a CONNECT that follows earlier requests on the same connection.
async fn serve_connect(state: &AppState, mut request: Request<Body>) -> Response {
    let connect = ConnectRequest::from_request(&request);
    let relays = request.extensions_mut().remove::<ServedTunnels>();
    let mut client = ServedConnection::from_request(&mut request);

    match state.tunnels.establish_served(&connect, &mut client).await {
        Ok(served) => {
            if let (Some(relay), Some(ServedTunnels(relays))) = (served.relay, relays) {
                let _ = relays.send(relay);
            }
            served.response
        }
        Err(err) => err.into_response(),
    }
}
