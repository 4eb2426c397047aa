//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Hostname-based dispatch settings.
    pub routing: RoutingConfig,

    /// The fixed backend behind the designated hostname.
    pub backend: BackendConfig,

    /// The forwarding proxy used for every other hostname.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on the request line plus header section of the first request.
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_header_bytes: 16 * 1024,
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Hostname served by the fixed backend. Matched case-insensitively.
    pub designated_host: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            designated_host: "myurl.com".to_string(),
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address as `host:port`. Used both as the HTTPS origin for
    /// reverse-proxied requests and as the dial target for direct tunnels.
    pub address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "30.20.55.43:443".to_string(),
        }
    }
}

impl BackendConfig {
    /// HTTPS origin for reverse-proxied requests.
    pub fn origin(&self) -> String {
        format!("https://{}", self.address)
    }
}

/// Upstream forwarding proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream proxy address as `host:port`.
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "your.upstream.proxy:8080".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Proxy URL handed to the HTTP client.
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

/// Timeout configuration for various operations.
///
/// A value of zero disables the corresponding timeout, except `connect_secs`
/// which must be positive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Dial timeout for backend, upstream and tunnel connections, in seconds.
    pub connect_secs: u64,

    /// Total time for a proxied HTTP request/response, in seconds.
    pub request_secs: u64,

    /// Idle deadline for each relay direction of a tunnel, in seconds.
    pub tunnel_idle_secs: u64,

    /// How long shutdown waits for live connections to drain, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 0,
            tunnel_idle_secs: 0,
            shutdown_grace_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Option<Duration> {
        non_zero_secs(self.request_secs)
    }

    pub fn tunnel_idle(&self) -> Option<Duration> {
        non_zero_secs(self.tunnel_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
