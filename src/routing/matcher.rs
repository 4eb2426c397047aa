//! Host matching logic.
//!
//! # Responsibilities
//! - Resolve the host a request is addressed to
//! - Match it against the designated hostname (exact or prefix)
//!
//! # Design Decisions
//! - Host matching is ASCII case-insensitive (RFC 9110 §4.2.3)
//! - Comparison never allocates; the expected host is lowercased once
//! - No regex to guarantee constant-time matching

use axum::http::{header, HeaderMap, Uri};

/// Matches a host against one expected hostname.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_ascii_lowercase(),
        }
    }

    /// The normalized hostname this matcher expects.
    pub fn expected(&self) -> &str {
        &self.expected_host
    }

    /// True when `host` equals the expected hostname.
    pub fn matches(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(&self.expected_host)
    }

    /// True when `host` starts with the expected hostname.
    ///
    /// CONNECT targets arrive as `host:port`, so the port suffix is tolerated.
    pub fn matches_prefix(&self, host: &str) -> bool {
        let expected = self.expected_host.as_bytes();
        host.len() >= expected.len() && host.as_bytes()[..expected.len()].eq_ignore_ascii_case(expected)
    }
}

/// Resolve the host a request is addressed to.
///
/// The authority of an absolute-form or authority-form request target wins;
/// otherwise the `Host` header is used.
pub fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    uri.authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(header::HOST).and_then(|h| h.to_str().ok()))
        .filter(|host| !host.is_empty())
}
