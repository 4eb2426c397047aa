//! Byte relay between the two ends of a tunnel.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ relay (client_to_remote) ──write──▶ remote
//! client ◀─write── relay (remote_to_client) ◀──read─── remote
//! ```
//!
//! # Design Decisions
//! - One task per direction; each owns its read half and the opposite write half
//! - The first relay to finish shuts down its destination and tells its
//!   partner to stop, so the tunnel lives as long as its shorter-lived side
//! - Shutdown errors on an already-closed socket are ignored
//! - An optional idle deadline bounds every read and write

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::observability::metrics;

const BUFFER_SIZE: usize = 16 * 1024;

/// Direction of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToRemote => "client_to_remote",
            Direction::RemoteToClient => "remote_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    pub direction: Direction,
    /// Bytes written to the destination.
    pub bytes: u64,
    /// Set when the copy stopped on an I/O error (including an idle timeout).
    pub error: Option<io::Error>,
    /// True when the relay stopped because its partner finished first.
    pub stopped_by_peer: bool,
}

/// Byte totals for a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// A running tunnel: two relay tasks.
#[derive(Debug)]
pub struct Tunnel {
    client_to_remote: JoinHandle<RelayOutcome>,
    remote_to_client: JoinHandle<RelayOutcome>,
}

impl Tunnel {
    /// Wait for both relays to finish.
    pub async fn join(self) -> TunnelStats {
        let (up, down) = tokio::join!(self.client_to_remote, self.remote_to_client);
        TunnelStats {
            client_to_remote: bytes_of(up),
            remote_to_client: bytes_of(down),
        }
    }
}

fn bytes_of(joined: Result<RelayOutcome, tokio::task::JoinError>) -> u64 {
    match joined {
        Ok(outcome) => outcome.bytes,
        Err(err) => {
            tracing::error!(error = %err, "Relay task failed");
            0
        }
    }
}

/// Start relaying between `client` and `remote` in both directions.
pub fn splice<C, R>(client: C, remote: R, idle_timeout: Option<Duration>) -> Tunnel
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (remote_read, remote_write) = tokio::io::split(remote);
    let closed = Arc::new(watch::channel(false).0);

    let client_to_remote = tokio::spawn(relay(
        Direction::ClientToRemote,
        client_read,
        remote_write,
        idle_timeout,
        Arc::clone(&closed),
    ));
    let remote_to_client = tokio::spawn(relay(
        Direction::RemoteToClient,
        remote_read,
        client_write,
        idle_timeout,
        closed,
    ));

    Tunnel {
        client_to_remote,
        remote_to_client,
    }
}

/// Copy `src` into `dst` until EOF, error, or the partner relay finishes.
pub async fn relay<Src, Dst>(
    direction: Direction,
    mut src: Src,
    mut dst: Dst,
    idle_timeout: Option<Duration>,
    closed: Arc<watch::Sender<bool>>,
) -> RelayOutcome
where
    Src: AsyncRead + Unpin,
    Dst: AsyncWrite + Unpin,
{
    let mut peer_done = closed.subscribe();
    let mut bytes = 0u64;

    let (error, stopped_by_peer) = tokio::select! {
        result = copy(&mut src, &mut dst, idle_timeout, &mut bytes) => (result.err(), false),
        _ = async { let _ = peer_done.wait_for(|done| *done).await; } => (None, true),
    };

    let _ = dst.shutdown().await;
    closed.send_replace(true);

    tracing::debug!(
        direction = %direction,
        bytes,
        stopped_by_peer,
        error = error.as_ref().map(tracing::field::display),
        "Relay finished"
    );
    metrics::record_tunnel_bytes(direction.as_str(), bytes);

    RelayOutcome {
        direction,
        bytes,
        error,
        stopped_by_peer,
    }
}

async fn copy<Src, Dst>(
    src: &mut Src,
    dst: &mut Dst,
    idle_timeout: Option<Duration>,
    bytes: &mut u64,
) -> io::Result<()>
where
    Src: AsyncRead + Unpin,
    Dst: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = with_deadline(idle_timeout, src.read(&mut buf)).await?;
        if n == 0 {
            return Ok(());
        }
        with_deadline(idle_timeout, dst.write_all(&buf[..n])).await?;
        *bytes += n as u64;
    }
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    op: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, op)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "relay idle timeout"))?,
        None => op.await,
    }
}
