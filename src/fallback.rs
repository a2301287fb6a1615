//! Fallback Responder
//!
//! The degraded-mode answer used whenever the upstream cannot serve a request,
//! and by the public `/fallback` endpoint. It performs no I/O and does not look
//! at the request, so every caller gets byte-identical output.

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayResponse;

pub const FALLBACK_STATUS: u16 = 503;
pub const FALLBACK_MESSAGE: &str = "Service temporarily unavailable. Please try again later.";

/// Wire body, kept byte-exact for clients that string-match it.
pub const FALLBACK_BODY: &str =
    r#"{"error": "Service temporarily unavailable. Please try again later.", "status": 503}"#;

/// Structured view of the fallback body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub error: String,
    pub status: u16,
}

impl Default for FallbackResponse {
    fn default() -> Self {
        Self {
            error: FALLBACK_MESSAGE.to_string(),
            status: FALLBACK_STATUS,
        }
    }
}

/// Build the fallback response.
#[must_use]
pub fn fallback_response() -> GatewayResponse {
    GatewayResponse::json_bytes(FALLBACK_STATUS, FALLBACK_BODY.as_bytes().to_vec())
}
