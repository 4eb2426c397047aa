//! First-request inspection on a raw connection.
//!
//! # Responsibilities
//! - Read the request line and header section without consuming it
//! - Keep header names and order exactly as the client sent them
//! - Resolve the host the request is addressed to
//!
//! # Design Decisions
//! - Header section is bounded by `listener.max_header_bytes`
//! - Parsing is zero-copy over the read-ahead buffer; only the head is copied out

use axum::http::{header, Method, StatusCode, Uri};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::net::Prebuffered;

/// Maximum number of header lines accepted in a message head.
pub(crate) const MAX_HEADERS: usize = 100;

/// Error reading the first request head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before a complete request head")]
    Closed,

    #[error("Malformed request: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("Malformed request: {0}")]
    InvalidField(&'static str),

    #[error("Request header section too large")]
    TooLarge,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl HeadError {
    /// Status to answer with, if the client is still there to read it.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HeadError::Malformed(_) | HeadError::InvalidField(_) => Some(StatusCode::BAD_REQUEST),
            HeadError::TooLarge => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            HeadError::Closed | HeadError::Io(_) => None,
        }
    }
}

/// One header line as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub name: String,
    pub value: Bytes,
}

/// Parsed request line and header section.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as sent (origin, absolute or authority form).
    pub target: String,
    /// HTTP minor version (`1` for HTTP/1.1).
    pub minor_version: u8,
    pub headers: Vec<RawHeader>,
    /// Authority of an absolute-form or authority-form target.
    pub authority: Option<String>,
    /// Length of the request line plus header section, including the blank line.
    pub len: usize,
}

impl RequestHead {
    /// Parses a request head from `buf`. Returns `None` while incomplete.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, HeadError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let len = match req.parse(buf)? {
            httparse::Status::Partial => return Ok(None),
            httparse::Status::Complete(len) => len,
        };

        let method = req
            .method
            .ok_or(HeadError::InvalidField("missing method"))?
            .parse::<Method>()
            .map_err(|_| HeadError::InvalidField("invalid method"))?;
        let target = req
            .path
            .ok_or(HeadError::InvalidField("missing request target"))?
            .to_string();
        let authority = target
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().map(|a| a.as_str().to_string()));
        let minor_version = req.version.ok_or(HeadError::InvalidField("missing version"))?;
        let headers = req
            .headers
            .iter()
            .map(|h| RawHeader {
                name: h.name.to_string(),
                value: Bytes::copy_from_slice(h.value),
            })
            .collect();

        Ok(Some(Self {
            method,
            target,
            minor_version,
            headers,
            authority,
            len,
        }))
    }

    /// Reads until a complete head is buffered. Nothing is consumed from `reader`.
    pub async fn peek<S: AsyncRead + Unpin>(reader: &mut Prebuffered<S>) -> Result<Self, HeadError> {
        loop {
            if let Some(head) = Self::parse(reader.buffer())? {
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

    /// The protocol token from the request line.
    pub fn version(&self) -> &'static str {
        match self.minor_version {
            0 => "HTTP/1.0",
            _ => "HTTP/1.1",
        }
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(&h.value).ok())
    }

    /// The host the request is addressed to: the target authority when the
    /// target carries one, otherwise the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.authority
            .as_deref()
            .or_else(|| self.header(header::HOST.as_str()))
            .filter(|host| !host.is_empty())
    }
}
