//! Request classification and dispatch.
//!
//! # Responsibilities
//! - Classify each request by method and host
//! - Pick the CONNECT branch (direct to backend or through the upstream)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1): one method comparison and one host comparison
//! - No per-request state; every request is classified independently

use std::fmt;

use axum::http::{Method, Request};

use crate::config::RoutingConfig;
use crate::routing::matcher::{request_host, HostMatcher};

/// Where a request is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// CONNECT request: handled by the tunnel establisher.
    Connect,
    /// Plain HTTP for the designated host: reverse-proxied to the backend.
    Direct,
    /// Plain HTTP for any other host: forwarded through the upstream proxy.
    Upstream,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Connect => "connect",
            Route::Direct => "direct",
            Route::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side a CONNECT tunnel is opened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelBranch {
    /// Dial the backend and confirm the tunnel locally.
    Direct,
    /// Dial the upstream proxy and replay the CONNECT handshake.
    Forwarded,
}

impl TunnelBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelBranch::Direct => "direct",
            TunnelBranch::Forwarded => "forwarded",
        }
    }
}

impl fmt::Display for TunnelBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request router.
#[derive(Debug, Clone)]
pub struct Router {
    designated: HostMatcher,
}

impl Router {
    /// Create a router for the given designated hostname.
    pub fn new(designated_host: impl Into<String>) -> Self {
        Self {
            designated: HostMatcher::new(designated_host),
        }
    }

    /// Create a router from configuration.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.designated_host.as_str())
    }

    /// The designated hostname, lowercased.
    pub fn designated_host(&self) -> &str {
        self.designated.expected()
    }

    /// Classify a request from its method and resolved host.
    pub fn route(&self, method: &Method, host: Option<&str>) -> Route {
        if *method == Method::CONNECT {
            return Route::Connect;
        }
        match host {
            Some(host) if self.designated.matches(host) => Route::Direct,
            _ => Route::Upstream,
        }
    }

    /// Classify an HTTP request.
    pub fn route_request<B>(&self, req: &Request<B>) -> Route {
        self.route(req.method(), request_host(req.uri(), req.headers()))
    }

    /// Pick the branch for a CONNECT request addressed to `host`.
    pub fn tunnel_branch(&self, host: Option<&str>) -> TunnelBranch {
        match host {
            Some(host) if self.designated.matches_prefix(host) => TunnelBranch::Direct,
            _ => TunnelBranch::Forwarded,
        }
    }
}
