//! Responses on raw sockets.
//!
//! # Responsibilities
//! - Answer errors on connections the HTTP server never took over
//!   (bad first request, failed tunnel setup before hijack)
//! - Read an upstream proxy's reply head so the HTTP server can relay it
//!
//! # Design Decisions
//! - Written errors are always a complete HTTP/1.1 message with
//!   `Content-Length` and `Connection: close`; the socket is dropped afterwards

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use hyper::ext::ReasonPhrase;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::http::request::{HeadError, RawHeader, MAX_HEADERS};
use crate::net::Prebuffered;

/// Headers that frame a message on one connection and are regenerated by
/// whoever writes it next.
const FRAMING_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

/// Render a plain-text error response.
pub fn plain_response(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{message}\n");
    let reason = status.canonical_reason().unwrap_or("");
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status.as_u16(),
        reason,
        body.len(),
        body
    )
    .into_bytes()
}

/// Write a plain-text error response and flush it.
pub async fn write_plain_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: StatusCode,
    message: &str,
) -> std::io::Result<()> {
    writer.write_all(&plain_response(status, message)).await?;
    writer.flush().await
}

/// Status line and header section of a response read off a raw socket.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Vec<RawHeader>,
    /// Length of the status line plus header section, including the blank line.
    pub len: usize,
}

impl ResponseHead {
    /// Parses a response head from `buf`. Returns `None` while incomplete.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, HeadError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);
        let len = match res.parse(buf)? {
            httparse::Status::Partial => return Ok(None),
            httparse::Status::Complete(len) => len,
        };

        let status = res
            .code
            .ok_or(HeadError::InvalidField("missing status"))
            .and_then(|code| {
                StatusCode::from_u16(code).map_err(|_| HeadError::InvalidField("invalid status"))
            })?;
        let headers = res
            .headers
            .iter()
            .map(|h| RawHeader {
                name: h.name.to_string(),
                value: Bytes::copy_from_slice(h.value),
            })
            .collect();

        Ok(Some(Self {
            status,
            reason: res.reason.unwrap_or_default().to_string(),
            headers,
            len,
        }))
    }

    /// Reads until a complete head is buffered and consumes it. Bytes after
    /// the head stay in `reader`.
    pub async fn read<S: AsyncRead + Unpin>(reader: &mut Prebuffered<S>) -> Result<Self, HeadError> {
        loop {
            if let Some(head) = Self::parse(reader.buffer())? {
                reader.discard(head.len);
                return Ok(head);
            }
            if reader.is_full() {
                return Err(HeadError::TooLarge);
            }
            if reader.buffer_more().await? == 0 {
                return Err(HeadError::Closed);
            }
        }
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(header::CONTENT_LENGTH.as_str()))
            .and_then(|h| std::str::from_utf8(&h.value).ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Rebuild as a response for the HTTP server to write, keeping the
    /// status, reason phrase and end-to-end headers.
    pub fn into_response(self, body: Bytes) -> Response {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;

        for raw in &self.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(raw.name.as_bytes()),
                HeaderValue::from_bytes(&raw.value),
            ) else {
                continue;
            };
            if !FRAMING_HEADERS.contains(&name.as_str()) {
                response.headers_mut().append(name, value);
            }
        }

        if !self.reason.is_empty() && self.status.canonical_reason() != Some(self.reason.as_str()) {
            if let Ok(reason) = ReasonPhrase::try_from(self.reason) {
                response.extensions_mut().insert(reason);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_complete_message() {
        let raw = plain_response(StatusCode::SERVICE_UNAVAILABLE, "Error connecting to target");
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("Content-Length: 27\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nError connecting to target\n"));
    }

    #[tokio::test]
    async fn writes_to_stream() {
        let mut out = Vec::new();
        write_plain_response(&mut out, StatusCode::BAD_REQUEST, "bad")
            .await
            .unwrap();
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn parses_upstream_reply_head() {
        let raw = b"HTTP/1.1 200 Connection established\r\nProxy-Agent: squid\r\n\r\n\x16\x03";
        let head = ResponseHead::parse(raw).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.reason, "Connection established");
        assert_eq!(head.headers[0].name, "Proxy-Agent");
        assert_eq!(head.len, raw.len() - 2);
        assert_eq!(head.content_length(), None);
    }

    #[test]
    fn partial_reply_head_is_none() {
        assert!(ResponseHead::parse(b"HTTP/1.1 407 Proxy Auth").unwrap().is_none());
    }

    #[tokio::test]
    async fn read_leaves_body_buffered() {
        let raw: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 4\r\n\r\ndeny";
        let mut reader = Prebuffered::new(raw, 1024);
        let head = ResponseHead::read(&mut reader).await.unwrap();
        assert_eq!(head.status, StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(head.content_length(), Some(4));
        assert_eq!(reader.buffer(), b"deny");
    }

    #[tokio::test]
    async fn read_rejects_closed_reply() {
        let mut reader = Prebuffered::new(&b"HTTP/1.1 200"[..], 1024);
        assert!(matches!(
            ResponseHead::read(&mut reader).await,
            Err(HeadError::Closed)
        ));
    }

    #[test]
    fn into_response_keeps_end_to_end_headers() {
        let raw = b"HTTP/1.1 407 Go Away\r\nProxy-Authenticate: Basic realm=\"up\"\r\nContent-Length: 4\r\nConnection: close\r\n\r\n";
        let head = ResponseHead::parse(raw).unwrap().unwrap();
        let response = head.into_response(Bytes::from_static(b"deny"));

        assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(response.headers()["proxy-authenticate"], "Basic realm=\"up\"");
        assert!(response.headers().get(header::CONNECTION).is_none());
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            response.extensions().get::<ReasonPhrase>().map(|r| r.as_bytes()),
            Some(&b"Go Away"[..])
        );
    }
}
