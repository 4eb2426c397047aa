//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses (`host:port` with a usable port)
//! - Validate value ranges (limits > 0, timeouts > 0 where required)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Smallest header budget that still fits a realistic request head.
const MIN_HEADER_BYTES: usize = 1024;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a valid socket address")]
    InvalidSocketAddr { field: &'static str, value: String },

    #[error("{field}: `{value}` must be host:port with a non-zero port")]
    InvalidHostPort { field: &'static str, value: String },

    #[error("routing.designated_host: `{0}` must be a bare hostname")]
    InvalidDesignatedHost(String),

    #[error("{field} must be greater than {min}")]
    TooSmall { field: &'static str, min: usize },
}

/// Validate a loaded configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidSocketAddr {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::TooSmall {
            field: "listener.max_connections",
            min: 0,
        });
    }
    if config.listener.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::TooSmall {
            field: "listener.max_header_bytes",
            min: MIN_HEADER_BYTES - 1,
        });
    }

    if !is_bare_hostname(&config.routing.designated_host) {
        errors.push(ValidationError::InvalidDesignatedHost(
            config.routing.designated_host.clone(),
        ));
    }

    check_host_port(&mut errors, "backend.address", &config.backend.address);
    check_host_port(&mut errors, "upstream.address", &config.upstream.address);

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::TooSmall {
            field: "timeouts.connect_secs",
            min: 0,
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidSocketAddr {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_host_port(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    let valid = value
        .parse::<Authority>()
        .ok()
        .filter(|authority| authority.as_str() == value && !authority.host().is_empty())
        .and_then(|authority| authority.port_u16())
        .is_some_and(|port| port != 0);

    if !valid {
        errors.push(ValidationError::InvalidHostPort {
            field,
            value: value.to_string(),
        });
    }
}

fn is_bare_hostname(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
