use std::sync::Arc;

use tracing::{debug, warn};

use super::Middleware;
use crate::gateway::{normalize_path, GatewayRequest, GatewayResponse};
use crate::security::{Access, AuthError, RouteAuthPolicy, TokenVerifier};

/// Authentication Gate
///
/// Normalizes the path, classifies it against the [`RouteAuthPolicy`] and,
/// for protected paths, requires a bearer token the [`TokenVerifier`] accepts.
/// Every rejection gets the same 401 body; the reason is only logged.
pub struct AuthMiddleware {
    policy: Arc<RouteAuthPolicy>,
    verifier: Arc<TokenVerifier>,
}

impl AuthMiddleware {
    #[must_use]
    pub fn new(policy: Arc<RouteAuthPolicy>, verifier: Arc<TokenVerifier>) -> Self {
        Self { policy, verifier }
    }

    /// The uniform rejection.
    #[must_use]
    pub fn unauthorized() -> GatewayResponse {
        let mut res = GatewayResponse::error(401, "Unauthorized");
        res.set_header("www-authenticate", "Bearer".to_string());
        res
    }

    fn authenticate(&self, req: &GatewayRequest) -> Result<crate::security::VerifiedIdentity, AuthError> {
        let token = req.bearer_token().ok_or(AuthError::MissingToken)?;
        self.verifier.verify(token)
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn before(&self, req: &mut GatewayRequest) -> Option<GatewayResponse> {
        match normalize_path(&req.path) {
            Ok(path) => req.path = path,
            Err(e) => {
                warn!(request_id = %req.request_id, error = %e, "Rejected malformed request path");
                return Some(GatewayResponse::error(400, "Bad Request"));
            }
        }

        if self.policy.classify(&req.method, &req.path) == Access::Public {
            debug!(request_id = %req.request_id, path = %req.path, "Public path admitted");
            return None;
        }

        match self.authenticate(req) {
            Ok(identity) => {
                debug!(
                    request_id = %req.request_id,
                    subject = %identity.subject,
                    "Bearer token verified"
                );
                req.identity = Some(identity);
                None
            }
            Err(e) => {
                e.log(&req.path);
                Some(Self::unauthorized())
            }
        }
    }
}
