use std::time::Duration;

use tracing::{debug, info, warn};

use super::Middleware;
use crate::gateway::{GatewayRequest, GatewayResponse};

/// Emits one structured completion event per request.
///
/// Never records the `Authorization` header or token material.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn before(&self, req: &mut GatewayRequest) -> Option<GatewayResponse> {
        debug!(
            request_id = %req.request_id,
            method = %req.method,
            path = %req.path,
            origin = req.origin().unwrap_or_default(),
            "Request received"
        );
        None
    }

    fn after(&self, req: &GatewayRequest, res: &mut GatewayResponse, latency: Duration) {
        let subject = req.identity.as_ref().map(|i| i.subject.as_str()).unwrap_or("-");
        let latency_ms = latency.as_millis() as u64;
        if res.status >= 500 {
            warn!(
                request_id = %req.request_id,
                method = %req.method,
                path = %req.path,
                status = res.status,
                latency_ms,
                subject,
                "Request completed"
            );
        } else {
            info!(
                request_id = %req.request_id,
                method = %req.method,
                path = %req.path,
                status = res.status,
                latency_ms,
                subject,
                "Request completed"
            );
        }
    }
}
