//! Reverse proxy for the designated host.
//!
//! # Responsibilities
//! - Rewrite the request URL to the backend's HTTPS origin
//! - Keep method, path, query, end-to-end headers (the original `Host`
//!   included) and body
//! - Stream the backend's response back unchanged
//!
//! # Design Decisions
//! - The backend is reached by address, so its certificate is never checked
//! - Environment proxy variables are ignored and redirects are not followed

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::Response;

use crate::config::ProxyConfig;
use crate::http::proxy::{self, ProxyError};

/// Forwards requests to the fixed TLS backend.
#[derive(Debug, Clone)]
pub struct DirectProxy {
    client: reqwest::Client,
    origin: String,
}

impl DirectProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        let client = proxy::client_builder(config.timeouts.connect())
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            origin: config.backend.origin(),
        })
    }

    /// Backend URL for a request target.
    pub fn target_url(&self, uri: &Uri) -> String {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.origin, path)
    }

    pub async fn proxy(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let url = self.target_url(request.uri());
        tracing::debug!(url = %url, method = %request.method(), "Forwarding to backend");
        proxy::forward(&self.client, &url, request).await
    }
}
