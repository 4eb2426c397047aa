//! Dual-mode HTTP/HTTPS router library.
//!
//! Plain HTTP for the designated host is reverse-proxied to a fixed TLS
//! backend; other HTTP traffic goes through an upstream forwarding proxy.
//! CONNECT requests become raw byte tunnels, either straight to the backend
//! or through the upstream proxy.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod tunnel;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
