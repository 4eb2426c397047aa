//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, live-connection tracking)
//!     → prebuffered.rs (read ahead the first request head)
//!     → Hand off to HTTP layer or tunnel establisher
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Read-ahead bytes are replayed, never lost

pub mod connection;
pub mod listener;
pub mod prebuffered;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use prebuffered::Prebuffered;
