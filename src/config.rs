//! Gateway configuration.
//!
//! Loaded once at startup from a YAML file, then adjusted by `BFFGATE_*`
//! environment variables and validated. Every field has a default, so an empty
//! file describes the stock web gateway apart from the issuer and audiences,
//! which must always be supplied.
//!
//! ```yaml
//! server:
//!   bind: 0.0.0.0:8081
//! auth:
//!   issuer: https://tenant.auth0.com/
//!   audiences: [https://api.aquaconecta.example]
//! upstream:
//!   base_url: http://localhost:8080
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::middleware::{CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder};
use crate::security::{
    default_jwks_url, Access, KeyCacheConfig, RouteAuthPolicy, RoutePatternError, RouteRule,
    TrustedIssuer,
};
use crate::upstream::{BreakerSettings, UpstreamSettings};

pub const ENV_BIND: &str = "BFFGATE_BIND";
pub const ENV_UPSTREAM_URL: &str = "BFFGATE_UPSTREAM_URL";
pub const ENV_JWT_ISSUER: &str = "BFFGATE_JWT_ISSUER";
pub const ENV_JWT_AUDIENCES: &str = "BFFGATE_JWT_AUDIENCES";
pub const ENV_JWKS_URL: &str = "BFFGATE_JWKS_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("auth.issuer must be set")]
    MissingIssuer,
    #[error("auth.audiences must contain at least one audience")]
    MissingAudiences,
    #[error("auth.algorithms must not be empty")]
    NoAlgorithms,
    #[error("unknown or unsupported JWT algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("invalid JWKS url '{0}': HTTPS is required except for localhost/127.0.0.1")]
    InvalidJwksUrl(String),
    #[error("invalid upstream url '{0}'")]
    InvalidUpstreamUrl(String),
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("server.workers must be greater than zero")]
    ZeroWorkers,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error(transparent)]
    Cors(#[from] CorsConfigError),
    #[error(transparent)]
    Route(#[from] RoutePatternError),
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    /// Ordered public/protected rules; anything unmatched is protected
    pub routes: RoutesConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    /// Worker threads; `None` defers to `BFFGATE_WORKERS` / available cores
    pub workers: Option<usize>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8081".to_string(),
            workers: None,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u32>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        Self {
            allowed_origins: owned(&[
                "http://localhost:4200",
                "http://localhost:3000",
                "http://localhost:*",
                "https://aquaconecta-ase.netlify.app",
                "https://cool-pasca-e1a790.netlify.app",
            ]),
            allowed_methods: owned(&["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "HEAD"]),
            allowed_headers: owned(&["*"]),
            exposed_headers: owned(&[
                "Authorization",
                "Content-Type",
                "X-Client-Type",
                "Access-Control-Allow-Origin",
                "Access-Control-Allow-Credentials",
            ]),
            allow_credentials: true,
            max_age_secs: Some(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub issuer: String,
    pub audiences: Vec<String>,
    /// Defaults to `<issuer>/.well-known/jwks.json`
    pub jwks_url: Option<String>,
    pub algorithms: Vec<String>,
    pub leeway_secs: u64,
    pub roles_claim: String,
    pub jwks_cache_ttl_secs: u64,
    pub jwks_fetch_timeout_ms: u64,
    pub min_refresh_interval_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audiences: Vec::new(),
            jwks_url: None,
            algorithms: vec!["RS256".to_string()],
            leeway_secs: 60,
            roles_claim: "roles".to_string(),
            jwks_cache_ttl_secs: 300,
            jwks_fetch_timeout_ms: 2000,
            min_refresh_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub pattern: String,
    #[serde(default)]
    pub methods: Vec<String>,
    pub access: Access,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutesConfig(pub Vec<RouteConfig>);

impl Default for RoutesConfig {
    fn default() -> Self {
        let rule = |pattern: &str, methods: &[&str]| RouteConfig {
            pattern: pattern.to_string(),
            methods: methods.iter().map(|m| (*m).to_string()).collect(),
            access: Access::Public,
        };
        Self(vec![
            rule("/**", &["OPTIONS"]),
            rule("/actuator/**", &[]),
            rule("/fallback", &[]),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 10_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_success_threshold: 2,
        }
    }
}

impl GatewayConfig {
    /// Read and parse a YAML file. Does not apply overrides or validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `BFFGATE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(bind) = get(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(url) = get(ENV_UPSTREAM_URL) {
            self.upstream.base_url = url;
        }
        if let Some(issuer) = get(ENV_JWT_ISSUER) {
            self.auth.issuer = issuer;
        }
        if let Some(audiences) = get(ENV_JWT_AUDIENCES) {
            self.auth.audiences = audiences
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(url) = get(ENV_JWKS_URL) {
            self.auth.jwks_url = Some(url);
        }
    }

    /// Check everything that can be checked without network access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))?;
        if self.server.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::ZeroValue("server.max_body_bytes"));
        }

        if self.auth.issuer.trim().is_empty() {
            return Err(ConfigError::MissingIssuer);
        }
        if self.auth.audiences.iter().all(|a| a.trim().is_empty()) {
            return Err(ConfigError::MissingAudiences);
        }
        self.algorithms()?;
        validate_jwks_url(&self.jwks_url())?;
        if self.auth.jwks_fetch_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("auth.jwks_fetch_timeout_ms"));
        }

        let upstream = Url::parse(&self.upstream.base_url)
            .map_err(|_| ConfigError::InvalidUpstreamUrl(self.upstream.base_url.clone()))?;
        if !matches!(upstream.scheme(), "http" | "https") || upstream.host_str().is_none() {
            return Err(ConfigError::InvalidUpstreamUrl(self.upstream.base_url.clone()));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("upstream.timeout_ms"));
        }
        let cb = &self.upstream.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(ConfigError::ZeroValue("upstream.circuit_breaker.failure_threshold"));
        }
        if cb.recovery_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("upstream.circuit_breaker.recovery_timeout_secs"));
        }
        if cb.half_open_success_threshold == 0 {
            return Err(ConfigError::ZeroValue(
                "upstream.circuit_breaker.half_open_success_threshold",
            ));
        }

        self.cors_builder()?.build_policy()?;
        self.route_policy()?;
        Ok(())
    }

    /// Effective JWKS endpoint.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        match &self.auth.jwks_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => default_jwks_url(&self.auth.issuer),
        }
    }

    pub fn algorithms(&self) -> Result<Vec<Algorithm>, ConfigError> {
        if self.auth.algorithms.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        self.auth
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name.trim()).map_err(|_| ConfigError::UnknownAlgorithm(name.clone()))
            })
            .collect()
    }

    pub fn cors_builder(&self) -> Result<CorsMiddlewareBuilder, CorsConfigError> {
        let mut builder = CorsMiddlewareBuilder::new()
            .allowed_origins(&self.cors.allowed_origins)
            .allowed_method_names(&self.cors.allowed_methods)?
            .allowed_headers(&self.cors.allowed_headers)
            .expose_headers(&self.cors.exposed_headers)
            .allow_credentials(self.cors.allow_credentials);
        if let Some(age) = self.cors.max_age_secs {
            builder = builder.max_age(age);
        }
        Ok(builder)
    }

    pub fn cors_middleware(&self) -> Result<CorsMiddleware, CorsConfigError> {
        self.cors_builder()?.build()
    }

    pub fn route_policy(&self) -> Result<RouteAuthPolicy, RoutePatternError> {
        let rules = self
            .routes
            .0
            .iter()
            .map(|r| RouteRule::from_parts(&r.pattern, &r.methods, r.access))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RouteAuthPolicy::new(rules))
    }

    pub fn trusted_issuer(&self) -> Result<TrustedIssuer, ConfigError> {
        Ok(TrustedIssuer::new(
            self.auth.issuer.trim(),
            self.auth
                .audiences
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        )
        .with_jwks_url(self.jwks_url())
        .with_algorithms(self.algorithms()?)
        .with_leeway(self.auth.leeway_secs)
        .with_roles_claim(self.auth.roles_claim.clone()))
    }

    #[must_use]
    pub fn key_cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig {
            ttl: Duration::from_secs(self.auth.jwks_cache_ttl_secs),
            min_refresh_interval: Duration::from_millis(self.auth.min_refresh_interval_ms),
            // A waiter never needs longer than one fetch plus slack.
            wait_timeout: Duration::from_millis(self.auth.jwks_fetch_timeout_ms.saturating_mul(2)),
        }
    }

    #[must_use]
    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.jwks_fetch_timeout_ms)
    }

    #[must_use]
    pub fn upstream_settings(&self) -> UpstreamSettings {
        let cb = &self.upstream.circuit_breaker;
        UpstreamSettings {
            base_url: self.upstream.base_url.clone(),
            timeout: Duration::from_millis(self.upstream.timeout_ms),
            breaker: BreakerSettings {
                failure_threshold: cb.failure_threshold,
                recovery_timeout: Duration::from_secs(cb.recovery_timeout_secs),
                half_open_success_threshold: cb.half_open_success_threshold,
            },
        }
    }
}

/// HTTPS everywhere; plain HTTP only for exact `localhost` / `127.0.0.1`, so
/// hosts like `localhost.attacker.example` are refused.
pub fn validate_jwks_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidJwksUrl(raw.to_string());
    let url = Url::parse(raw).map_err(|_| invalid())?;
    match url.scheme() {
        "https" if url.host_str().is_some() => Ok(()),
        "http" => match url.host_str() {
            Some("localhost") | Some("127.0.0.1") => Ok(()),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}
