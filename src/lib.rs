//! # bffgate
//!
//! **bffgate** is an authenticating edge gateway for browser-facing backends. Every inbound
//! request passes through a fixed pipeline before anything reaches the backend:
//!
//! 1. **CORS decision filter** answers preflights directly and decorates responses for
//!    allow-listed origins. Denied origins get no CORS headers at all.
//! 2. **Authentication gate** classifies the normalized path against an ordered rule list
//!    (unmatched paths are protected) and verifies bearer JWTs against keys published by the
//!    trusted issuer's JWKS endpoint.
//! 3. **Upstream proxy** forwards admitted requests to the configured backend behind a circuit
//!    breaker; failures are answered by the **fallback responder**.
//!
//! ## Modules
//!
//! - **[`config`]** - YAML configuration, `BFFGATE_*` overrides, validation
//! - **[`gateway`]** - request/response types shared by every stage, path normalization
//! - **[`middleware`]** - the middleware chain plus tracing, CORS and auth stages
//! - **[`security`]** - route policy, signing-key cache, token verification
//! - **[`upstream`]** - reverse proxy client and circuit breaker
//! - **[`fallback`]** - the degraded-mode response
//! - **[`server`]** - `tiny_http` adapter, worker pool, health endpoint
//! - **[`otel`]** - structured logging setup
//!
//! ## Signing keys
//!
//! Keys live in a single shared [`security::KeyCache`]. Reads are lock-free snapshots; a
//! token whose `kid` is unknown triggers at most one coalesced refetch no matter how many
//! requests carry it concurrently, and a failed refetch keeps serving the previous keys.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bffgate::config::GatewayConfig;
//! use bffgate::server::{GatewayService, HttpServer};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut config = GatewayConfig::load("config/gateway.yaml".as_ref())?;
//! config.apply_env_overrides();
//! let service = Arc::new(GatewayService::from_config(&config)?);
//! let handle = HttpServer::new(service).start(config.server.bind.as_str())?;
//! handle.wait_ready()?;
//! # handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod fallback;
pub mod gateway;
pub mod ids;
pub mod middleware;
pub mod otel;
pub mod runtime_config;
pub mod security;
pub mod server;
pub mod upstream;

pub use config::GatewayConfig;
pub use fallback::fallback_response;
pub use gateway::{GatewayRequest, GatewayResponse};
pub use server::{GatewayService, HttpServer, ServerHandle};
