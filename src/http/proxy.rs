//! Shared outbound HTTP forwarding.
//!
//! Both HTTP proxies hand a request to a preconfigured `reqwest` client and
//! stream the answer back; they differ only in the client and the target URL.

use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::headers::strip_hop_by_hop;

/// Errors while proxying a plain HTTP request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request has no host to forward to")]
    MissingHost,

    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("upstream timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Request(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(err)
        } else if err.is_builder() {
            ProxyError::InvalidTarget(err.to_string())
        } else {
            ProxyError::Request(err)
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::BAD_GATEWAY => "Bad Gateway".to_string(),
            _ => self.to_string(),
        };
        (status, message).into_response()
    }
}

/// Start a client builder with the settings both proxies share.
pub(crate) fn client_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
}

/// Send `request` to `url` with `client` and stream the response back.
pub(crate) async fn forward(
    client: &reqwest::Client,
    url: &str,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    let mut outbound = client.request(parts.method, url).headers(headers);
    if !matches!(body.size_hint().exact(), Some(0)) {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = outbound.send().await?;
    tracing::debug!(url, status = %upstream.status(), "Upstream responded");

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_bad_request() {
        let client = client_builder(Duration::from_secs(1)).no_proxy().build().unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let err = forward(&client, "not a url", request).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreachable_target_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_builder(Duration::from_secs(1)).no_proxy().build().unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let err = forward(&client, &format!("http://{addr}/"), request)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_host_is_bad_request() {
        assert_eq!(ProxyError::MissingHost.status(), StatusCode::BAD_REQUEST);
    }
}
