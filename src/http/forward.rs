//! Forwarding of non-designated HTTP traffic through the upstream proxy.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Uri};
use axum::response::Response;

use crate::config::ProxyConfig;
use crate::http::proxy::{self, ProxyError};
use crate::routing::request_host;

/// Sends every request through the configured upstream proxy.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
}

impl UpstreamProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        let client = proxy::client_builder(config.timeouts.connect())
            .proxy(reqwest::Proxy::all(config.upstream.proxy_url())?)
            .build()?;
        Ok(Self { client })
    }

    /// Absolute URL of the request: the target as received when absolute,
    /// otherwise rebuilt from the request host.
    pub fn target_url(uri: &Uri, headers: &HeaderMap) -> Result<String, ProxyError> {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri.to_string());
        }
        let host = request_host(uri, headers).ok_or(ProxyError::MissingHost)?;
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Ok(format!("http://{host}{path}"))
    }

    pub async fn proxy(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let url = Self::target_url(request.uri(), request.headers())?;
        tracing::debug!(url = %url, method = %request.method(), "Forwarding via upstream proxy");
        proxy::forward(&self.client, &url, request).await
    }
}
