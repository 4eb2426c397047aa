//! Taking over a client connection for tunneling.
//!
//! A CONNECT request that opens a fresh connection is read by the server
//! itself, so the socket can be handed out as a raw byte stream right away
//! ([`RawClient`]). A CONNECT that arrives later on a connection owned by the
//! HTTP/1.1 server is taken over through hyper's upgrade mechanism
//! ([`ServedConnection`]): the socket is released only after the server has
//! written the reply.
//!
//! Once hijacked, a connection never goes back to the HTTP layer.

use axum::http::{Request, StatusCode};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::response::write_plain_response;
use crate::net::Prebuffered;

#[derive(Debug, Error)]
pub enum HijackError {
    /// The serving layer cannot hand out the socket.
    #[error("Hijacking not supported")]
    Unsupported,

    #[error("connection already hijacked")]
    AlreadyHijacked,

    /// The server failed to release the socket after replying.
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),
}

impl HijackError {
    pub fn status(&self) -> StatusCode {
        match self {
            HijackError::Unsupported | HijackError::Upgrade(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HijackError::AlreadyHijacked => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// A client connection that may be taken over as a raw stream.
pub trait Hijacker {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Take over the connection. Succeeds at most once.
    fn hijack(&mut self) -> Result<Self::Io, HijackError>;

    fn is_hijacked(&self) -> bool;
}

/// A connection read directly off the listener.
#[derive(Debug)]
pub struct RawClient<S> {
    io: Option<Prebuffered<S>>,
}

impl<S> RawClient<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap a connection whose request head has already been consumed.
    /// Bytes still buffered (sent ahead by the client) stay in front of the stream.
    pub fn new(io: Prebuffered<S>) -> Self {
        Self { io: Some(io) }
    }

    /// Answer with an ordinary HTTP error. No-op once hijacked.
    pub async fn respond(&mut self, status: StatusCode, message: &str) -> std::io::Result<()> {
        match self.io.as_mut() {
            Some(io) => write_plain_response(io, status, message).await,
            None => Ok(()),
        }
    }
}

impl<S> Hijacker for RawClient<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Io = Prebuffered<S>;

    fn hijack(&mut self) -> Result<Self::Io, HijackError> {
        self.io.take().ok_or(HijackError::AlreadyHijacked)
    }

    fn is_hijacked(&self) -> bool {
        self.io.is_none()
    }
}

/// A connection owned by the HTTP/1.1 server.
///
/// Holds the request's pending upgrade, present only when the server was
/// started with upgrades enabled.
#[derive(Debug, Default)]
pub struct ServedConnection {
    upgrade: Option<OnUpgrade>,
    hijacked: bool,
}

impl ServedConnection {
    /// Take the pending upgrade out of `request`.
    pub fn from_request<B>(request: &mut Request<B>) -> Self {
        Self {
            upgrade: request.extensions_mut().remove::<OnUpgrade>(),
            hijacked: false,
        }
    }

    /// Claim the connection. The socket is handed out by
    /// [`PendingUpgrade::wait`] once the server has sent a 2xx reply.
    pub fn hijack(&mut self) -> Result<PendingUpgrade, HijackError> {
        if self.hijacked {
            return Err(HijackError::AlreadyHijacked);
        }
        let upgrade = self.upgrade.take().ok_or(HijackError::Unsupported)?;
        self.hijacked = true;
        Ok(PendingUpgrade(upgrade))
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }
}

/// A claimed served connection, waiting for the server to release it.
#[derive(Debug)]
pub struct PendingUpgrade(OnUpgrade);

impl PendingUpgrade {
    pub async fn wait(self) -> Result<TokioIo<Upgraded>, HijackError> {
        Ok(TokioIo::new(self.0.await?))
    }
}
