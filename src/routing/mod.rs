//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, host)
//!     → router.rs (classify)
//!     → matcher.rs (host resolution, exact/prefix comparison)
//!     → Return: Route::{Connect, Direct, Upstream}
//!
//! CONNECT requests:
//!     → router.rs (tunnel_branch)
//!     → Return: TunnelBranch::{Direct, Forwarded}
//! ```
//!
//! # Design Decisions
//! - Router built once from config, immutable at runtime
//! - Deterministic: same input always yields the same route
//! - Handed explicitly to the server; no global registration

pub mod matcher;
pub mod router;

pub use matcher::{request_host, HostMatcher};
pub use router::{Route, Router, TunnelBranch};
