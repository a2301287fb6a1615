mod builder;
mod error;
mod origin;

pub use self::builder::CorsMiddlewareBuilder;
pub use self::error::CorsConfigError;
pub use self::origin::OriginPattern;

use std::time::Duration;

use http::Method;
use tracing::debug;

use crate::gateway::{GatewayRequest, GatewayResponse};
use crate::middleware::Middleware;

const PREFLIGHT_VARY: &str = "Origin, Access-Control-Request-Method, Access-Control-Request-Headers";

/// Immutable CORS configuration.
///
/// Built once at startup through [`CorsMiddlewareBuilder`] and shared
/// read-only by every worker.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub(crate) origins: Vec<OriginPattern>,
    pub(crate) allowed_methods: Vec<Method>,
    pub(crate) allowed_headers: Vec<String>,
    pub(crate) expose_headers: Vec<String>,
    pub(crate) allow_credentials: bool,
    pub(crate) max_age: Option<u32>,
}

/// What the filter decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// Not a cross-origin request (no `Origin` header)
    NotCors,
    /// Origin or requested method/headers not allowed: no CORS headers
    Denied,
    /// Allowed; carries the value for `Access-Control-Allow-Origin`
    Allowed(String),
}

impl CorsPolicy {
    fn allows_all_origins(&self) -> bool {
        self.origins.iter().any(|o| matches!(o, OriginPattern::Any))
    }

    fn allows_all_headers(&self) -> bool {
        self.allowed_headers.iter().any(|h| h == "*")
    }

    /// Decide on an origin alone.
    #[must_use]
    pub fn check_origin(&self, origin: Option<&str>) -> CorsDecision {
        let Some(origin) = origin else {
            return CorsDecision::NotCors;
        };
        if !self.origins.iter().any(|p| p.matches(origin)) {
            return CorsDecision::Denied;
        }
        // `*` is only ever echoed when credentials are off.
        if self.allows_all_origins() && !self.allow_credentials {
            CorsDecision::Allowed("*".to_string())
        } else {
            CorsDecision::Allowed(origin.to_string())
        }
    }

    /// Decide on a preflight: origin, then requested method and headers.
    #[must_use]
    pub fn check_preflight(&self, req: &GatewayRequest) -> CorsDecision {
        let decision = self.check_origin(req.origin());
        if !matches!(decision, CorsDecision::Allowed(_)) {
            return decision;
        }
        if let Some(requested) = req.get_header("access-control-request-method") {
            let allowed = requested
                .trim()
                .parse::<Method>()
                .map(|m| self.allowed_methods.contains(&m))
                .unwrap_or(false);
            if !allowed {
                debug!(method = %requested, "CORS preflight: method not allowed");
                return CorsDecision::Denied;
            }
        }
        if !self.allows_all_headers() {
            for header in requested_headers(req) {
                if !self.allowed_headers.iter().any(|h| h.eq_ignore_ascii_case(header)) {
                    debug!(header = %header, "CORS preflight: header not allowed");
                    return CorsDecision::Denied;
                }
            }
        }
        decision
    }

    fn preflight_response(&self, req: &GatewayRequest, allow_origin: String) -> GatewayResponse {
        let mut res = GatewayResponse::new(200);
        res.set_header("access-control-allow-origin", allow_origin);
        res.set_header(
            "access-control-allow-methods",
            self.allowed_methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        );
        let allow_headers = if self.allows_all_headers() {
            requested_headers(req).collect::<Vec<_>>().join(", ")
        } else {
            self.allowed_headers.join(", ")
        };
        if !allow_headers.is_empty() {
            res.set_header("access-control-allow-headers", allow_headers);
        }
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if let Some(age) = self.max_age {
            res.set_header("access-control-max-age", age.to_string());
        }
        res.set_header("vary", PREFLIGHT_VARY.to_string());
        res
    }

    fn decorate(&self, res: &mut GatewayResponse, allow_origin: String) {
        res.set_header("access-control-allow-origin", allow_origin);
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if !self.expose_headers.is_empty() {
            res.set_header("access-control-expose-headers", self.expose_headers.join(", "));
        }
        let vary = match res.get_header("vary") {
            Some(existing) if existing.split(',').any(|v| v.trim().eq_ignore_ascii_case("origin")) => {
                existing.to_string()
            }
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, Origin"),
            _ => "Origin".to_string(),
        };
        res.set_header("vary", vary);
    }

    #[must_use]
    pub fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }
}

fn requested_headers(req: &GatewayRequest) -> impl Iterator<Item = &str> {
    req.get_header("access-control-request-headers")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

/// CORS Decision Filter
///
/// Runs first in the chain. Preflights (`OPTIONS`) are always answered here
/// with 200 and never reach authentication. A denied preflight gets no CORS
/// headers, which the browser treats as a refusal. Other requests are never
/// short-circuited; matching origins get CORS headers added to whatever
/// response comes back, including 401s and fallback responses.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    policy: CorsPolicy,
}

impl CorsMiddleware {
    #[must_use]
    pub fn new(policy: CorsPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &CorsPolicy {
        &self.policy
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn before(&self, req: &mut GatewayRequest) -> Option<GatewayResponse> {
        if req.method != Method::OPTIONS {
            return None;
        }
        match self.policy.check_preflight(req) {
            CorsDecision::Allowed(origin) => Some(self.policy.preflight_response(req, origin)),
            CorsDecision::NotCors => Some(GatewayResponse::new(200)),
            CorsDecision::Denied => {
                debug!(
                    origin = req.origin().unwrap_or_default(),
                    path = %req.path,
                    "CORS preflight denied"
                );
                Some(GatewayResponse::new(200))
            }
        }
    }

    fn after(&self, req: &GatewayRequest, res: &mut GatewayResponse, _latency: Duration) {
        if req.method == Method::OPTIONS {
            return;
        }
        match self.policy.check_origin(req.origin()) {
            CorsDecision::Allowed(origin) => self.policy.decorate(res, origin),
            CorsDecision::Denied => {
                debug!(origin = req.origin().unwrap_or_default(), "CORS: origin not allowed");
            }
            CorsDecision::NotCors => {}
        }
    }
}
