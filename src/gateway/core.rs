//! Per-request data flowing through the gateway pipeline.
//!
//! A [`GatewayRequest`] is owned by exactly one worker for the lifetime of one
//! inbound request. Nothing in it is shared with other requests; the verified
//! identity attached by the authentication gate dies with it.

use std::net::SocketAddr;
use std::sync::Arc;

use http::Method;
use serde_json::Value;
use smallvec::SmallVec;

use crate::ids::RequestId;
use crate::security::VerifiedIdentity;

/// Maximum inline headers before heap allocation.
/// Most browser requests carry fewer than 16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
///
/// Header names use `Arc<str>` so static names (`vary`, `content-type`, ...) are
/// shared instead of copied. Values are per-request data and stay `String`.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// An inbound request as seen by the middleware chain.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// HTTP method (GET, OPTIONS, etc.)
    pub method: Method,
    /// Normalized request path, without the query string
    pub path: String,
    /// Raw query string (without the leading `?`)
    pub query: Option<String>,
    /// HTTP headers, names lowercased
    pub headers: HeaderVec,
    /// Request body (already size-limited by the server)
    pub body: Vec<u8>,
    /// Peer address of the client connection
    pub remote_addr: Option<SocketAddr>,
    /// Identity verified by the authentication gate, if the path was protected
    pub identity: Option<VerifiedIdentity>,
}

impl GatewayRequest {
    /// Build a request from a method and a request target (`/path?query`).
    ///
    /// The path is taken verbatim; callers that accept untrusted input run it
    /// through [`normalize_path`](super::normalize_path) first.
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            request_id: RequestId::new(),
            method,
            path,
            query,
            headers: HeaderVec::new(),
            body: Vec::new(),
            remote_addr: None,
            identity: None,
        }
    }

    /// Builder-style header insertion (name is lowercased).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Origin` header, if the client declared one.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.get_header("origin")
    }

    /// Extract the credential from `Authorization: Bearer <token>`.
    ///
    /// The scheme is matched case-insensitively. An empty token or any other
    /// scheme yields `None`.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.get_header("authorization")?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    /// Path plus query, as forwarded upstream.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// A response produced by a middleware short-circuit, a built-in endpoint,
/// the upstream proxy, or the fallback responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderVec,
    /// Raw response body
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// Empty-bodied response with the given status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    /// JSON response with `content-type: application/json`.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::json_bytes(status, body.to_string().into_bytes())
    }

    /// JSON response from an already-serialized body.
    #[must_use]
    pub fn json_bytes(status: u16, body: Vec<u8>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create an error response `{"error": message}`
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Get a header by name
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Append a header without touching existing values of the same name.
    pub fn append_header(&mut self, name: &str, value: String) {
        self.headers.push((Arc::from(name), value));
    }

    /// Parse the body as JSON (handy for assertions and health aggregation).
    #[must_use]
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}
