//! Forwarding of admitted requests to the single configured backend.
//!
//! Transport errors and timeouts count against the circuit breaker and are
//! answered by the fallback responder. HTTP responses of any status are passed
//! through unchanged apart from hop-by-hop and CORS headers.

mod circuit_breaker;

pub use self::circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};

use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::fallback::fallback_response;
use crate::gateway::{GatewayRequest, GatewayResponse};

/// Headers meaningful only for a single connection (RFC 9110 section 7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Identity headers only the gateway may set.
const IDENTITY_PREFIX: &str = "x-authenticated-";

const CORS_PREFIX: &str = "access-control-";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream circuit is open")]
    CircuitOpen,
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub breaker: BreakerSettings,
}

/// Blocking reverse-proxy client with a circuit breaker.
pub struct UpstreamClient {
    base: Url,
    timeout: Duration,
    client: reqwest::blocking::Client,
    breaker: CircuitBreaker,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {e}", settings.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(UpstreamError::InvalidUrl(settings.base_url.clone()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            base,
            timeout: settings.timeout,
            client,
            breaker: CircuitBreaker::new(settings.breaker),
        })
    }

    /// Forward a request, answering with the fallback on any failure.
    #[must_use]
    pub fn proxy(&self, req: &GatewayRequest) -> GatewayResponse {
        match self.forward(req) {
            Ok(res) => res,
            Err(e) => {
                warn!(
                    request_id = %req.request_id,
                    path = %req.path,
                    error = %e,
                    circuit = %self.breaker.state(),
                    "Upstream unavailable, serving fallback"
                );
                fallback_response()
            }
        }
    }

    /// Forward a request through the breaker.
    pub fn forward(&self, req: &GatewayRequest) -> Result<GatewayResponse, UpstreamError> {
        if !self.breaker.allow_request() {
            return Err(UpstreamError::CircuitOpen);
        }
        let started = Instant::now();
        match self.send(req) {
            Ok(res) => {
                self.breaker.record_success();
                debug!(
                    request_id = %req.request_id,
                    status = res.status,
                    upstream_ms = started.elapsed().as_millis() as u64,
                    "Upstream responded"
                );
                Ok(res)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn target_url(&self, req: &GatewayRequest) -> Result<Url, UpstreamError> {
        let base = self.base.as_str().trim_end_matches('/');
        let target = format!("{base}{}", req.path_and_query());
        Url::parse(&target).map_err(|e| UpstreamError::InvalidUrl(format!("{target}: {e}")))
    }

    fn send(&self, req: &GatewayRequest) -> Result<GatewayResponse, UpstreamError> {
        let url = self.target_url(req)?;
        let mut builder = self.client.request(req.method.clone(), url);

        let connection_tokens = connection_tokens(req.get_header("connection"));
        for (name, value) in &req.headers {
            if !is_forwardable_request_header(name, &connection_tokens) {
                continue;
            }
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                builder = builder.header(n, v);
            }
        }

        let forwarded_for = match (req.get_header("x-forwarded-for"), req.remote_addr) {
            (Some(prior), Some(peer)) => Some(format!("{prior}, {}", peer.ip())),
            (None, Some(peer)) => Some(peer.ip().to_string()),
            (Some(prior), None) => Some(prior.to_string()),
            (None, None) => None,
        };
        if let Some(xff) = forwarded_for {
            builder = builder.header("x-forwarded-for", xff);
        }
        if let Some(host) = req.get_header("host") {
            builder = builder.header("x-forwarded-host", host);
        }
        builder = builder.header("x-request-id", req.request_id.to_string());
        if let Some(identity) = &req.identity {
            builder = builder
                .header("x-authenticated-subject", identity.subject.as_str())
                .header("x-authenticated-roles", identity.roles.join(","));
        }
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let response = builder.send().map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let mut out = GatewayResponse::new(status);
        for (name, value) in response.headers() {
            let name = name.as_str();
            if !is_forwardable_response_header(name) {
                continue;
            }
            let Ok(v) = value.to_str() else { continue };
            if name == "vary" {
                if let Some(v) = vary_without_origin(v) {
                    out.append_header(name, v);
                }
            } else {
                out.append_header(name, v.to_string());
            }
        }
        out.body = response.bytes().map_err(|e| self.classify(e))?.to_vec();
        Ok(out)
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

fn connection_tokens(connection: Option<&str>) -> Vec<String> {
    connection
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Response headers that reach the client. CORS headers are owned by the
/// gateway's CORS stage, never by the backend.
fn is_forwardable_response_header(name: &str) -> bool {
    !(HOP_BY_HOP.contains(&name)
        || name == "content-length"
        || name.starts_with(CORS_PREFIX))
}

fn vary_without_origin(vary: &str) -> Option<String> {
    let kept: Vec<&str> = vary
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("origin"))
        .collect();
    (!kept.is_empty()).then(|| kept.join(", "))
}

/// Request headers that go upstream as-is.
fn is_forwardable_request_header(name: &str, connection_tokens: &[String]) -> bool {
    let name = name.to_ascii_lowercase();
    !(HOP_BY_HOP.contains(&name.as_str())
        || connection_tokens.iter().any(|t| *t == name)
        || name == "host"
        || name == "content-length"
        || name == "x-forwarded-for"
        || name == "x-request-id"
        || name.starts_with(IDENTITY_PREFIX))
}
