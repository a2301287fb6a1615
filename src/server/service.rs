use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use http::Method;
use serde_json::json;
use tracing::{debug, info, warn};

use super::request::{read_body, read_head, RequestError};
use super::response::into_http_response;
use crate::config::GatewayConfig;
use crate::fallback::fallback_response;
use crate::gateway::{GatewayRequest, GatewayResponse};
use crate::middleware::{AuthMiddleware, MiddlewareChain, TracingMiddleware};
use crate::security::{HttpKeySource, KeyCache, TokenVerifier};
use crate::upstream::{CircuitState, UpstreamClient};

pub const HEALTH_PATH: &str = "/actuator/health";
pub const FALLBACK_PATH: &str = "/fallback";

/// The gateway request pipeline: middleware chain in front of the built-in
/// endpoints and the upstream proxy.
///
/// Shared by all worker threads; holds no per-request state.
pub struct GatewayService {
    chain: MiddlewareChain,
    upstream: Arc<UpstreamClient>,
    keys: Arc<KeyCache>,
    max_body_bytes: usize,
}

impl GatewayService {
    pub fn new(
        chain: MiddlewareChain,
        upstream: Arc<UpstreamClient>,
        keys: Arc<KeyCache>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            chain,
            upstream,
            keys,
            max_body_bytes,
        }
    }

    /// Build the full pipeline from a validated configuration.
    ///
    /// Stage order is fixed: tracing, CORS, authentication. The key set is
    /// fetched once here; a failure is logged and retried on first use.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate().context("invalid gateway configuration")?;

        let jwks_url = config.jwks_url();
        let source = HttpKeySource::new(jwks_url.clone(), config.jwks_fetch_timeout())
            .context("failed to build JWKS client")?;
        let keys = Arc::new(KeyCache::new(source, config.key_cache_config()));
        match keys.prime() {
            Ok(count) => info!(jwks_url = %jwks_url, keys = count, "Loaded signing keys"),
            Err(e) => warn!(
                jwks_url = %jwks_url,
                error = %e,
                "Initial signing key fetch failed; protected routes reject until keys load"
            ),
        }

        let verifier = Arc::new(TokenVerifier::new(
            config.trusted_issuer().context("invalid auth settings")?,
            Arc::clone(&keys),
        ));
        let policy = Arc::new(config.route_policy().context("invalid route rules")?);
        let cors = config.cors_middleware().context("invalid CORS settings")?;
        let upstream = Arc::new(
            UpstreamClient::new(&config.upstream_settings())
                .context("failed to build upstream client")?,
        );

        let chain = MiddlewareChain::new()
            .with(TracingMiddleware)
            .with(cors)
            .with(AuthMiddleware::new(policy, verifier));
        info!(
            stages = ?chain.names(),
            upstream = %upstream.base_url(),
            "Gateway pipeline ready"
        );
        Ok(Self::new(
            chain,
            upstream,
            keys,
            config.server.max_body_bytes,
        ))
    }

    /// Run one request through the pipeline.
    pub fn handle(&self, mut req: GatewayRequest) -> GatewayResponse {
        let request_id = req.request_id;
        let mut res = self.chain.handle(&mut req, |req| self.route(req));
        res.set_header("x-request-id", request_id.to_string());
        res
    }

    /// Read, handle and answer a `tiny_http` request.
    pub fn serve(&self, mut rq: tiny_http::Request) {
        let started = Instant::now();
        let res = match read_head(&rq) {
            Ok(mut req) => match read_body(&mut rq, &mut req, self.max_body_bytes) {
                Ok(()) => self.handle(req),
                Err(e) => self.refuse(&req, &e, started),
            },
            Err(e) => {
                warn!(url = rq.url(), error = %e, "Rejected unreadable request");
                e.to_response()
            }
        };
        if let Err(e) = rq.respond(into_http_response(res)) {
            debug!(error = %e, "Client disconnected before the response was written");
        }
    }

    /// Answer a request whose body could not be read. The response still
    /// passes every stage's `after`, so it is logged and CORS-decorated.
    pub fn refuse(
        &self,
        req: &GatewayRequest,
        err: &RequestError,
        started: Instant,
    ) -> GatewayResponse {
        debug!(request_id = %req.request_id, error = %err, "Refusing request");
        let mut res = err.to_response();
        self.chain.finish(req, &mut res, started.elapsed());
        res.set_header("x-request-id", req.request_id.to_string());
        res
    }

    /// Terminal handler for admitted requests.
    fn route(&self, req: &GatewayRequest) -> GatewayResponse {
        let path = req.path.trim_end_matches('/');
        if path == FALLBACK_PATH {
            return fallback_response();
        }
        if path == HEALTH_PATH {
            return if matches!(req.method, Method::GET | Method::HEAD) {
                health_response(&self.upstream, &self.keys)
            } else {
                GatewayResponse::error(405, "Method Not Allowed")
            };
        }
        if path == "/actuator" || path.starts_with("/actuator/") {
            return GatewayResponse::error(404, "Not Found");
        }
        self.upstream.proxy(req)
    }

    #[must_use]
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    #[must_use]
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }
}

/// `GET /actuator/health`.
///
/// The gateway itself is always `UP` while it answers; an open upstream
/// circuit or an empty key set is reported per component.
#[must_use]
pub fn health_response(upstream: &UpstreamClient, keys: &KeyCache) -> GatewayResponse {
    let breaker = upstream.breaker().snapshot();
    let upstream_status = match upstream.breaker().state() {
        CircuitState::Open { .. } => "DOWN",
        CircuitState::HalfOpen | CircuitState::Closed => "UP",
    };
    let stats = keys.stats();
    let jwks_status = if stats.keys > 0 { "UP" } else { "DOWN" };
    GatewayResponse::json(
        200,
        &json!({
            "status": "UP",
            "components": {
                "upstream": {
                    "status": upstream_status,
                    "circuit": breaker.state,
                    "consecutive_failures": breaker.consecutive_failures,
                    "rejected": breaker.rejected,
                },
                "jwks": {
                    "status": jwks_status,
                    "keys": stats.keys,
                    "fetches": stats.fetches,
                    "failures": stats.failures,
                }
            }
        }),
    )
}
