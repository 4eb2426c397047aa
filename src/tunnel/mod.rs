//! CONNECT tunneling subsystem.
//!
//! # Data Flow
//! ```text
//! CONNECT request (raw connection, or served through a hyper upgrade)
//!     → connect.rs (pick branch, dial, handshake)
//!     → hijack.rs (take the client socket from the HTTP layer)
//!     → relay.rs (copy bytes both ways until either side closes)
//! ```
//!
//! # Design Decisions
//! - The remote side is dialed before the client is hijacked, so a failed
//!   dial can still be answered with an HTTP error
//! - The router never inspects tunneled bytes

pub mod connect;
pub mod hijack;
pub mod relay;

pub use connect::{ConnectRequest, ServedTunnel, TunnelError, TunnelEstablisher, CONNECTION_ESTABLISHED};
pub use hijack::{HijackError, Hijacker, PendingUpgrade, RawClient, ServedConnection};
pub use relay::{splice, Direction, Tunnel, TunnelStats};
