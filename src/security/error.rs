//! Authentication failures.
//!
//! Every variant maps to the same client-facing `401 {"error":"Unauthorized"}`.
//! The detail only ever reaches the log, never the response body.

use thiserror::Error;
use tracing::{debug, warn};

/// Why a protected request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` credential
    #[error("missing bearer token")]
    MissingToken,
    /// Header could not be decoded or the token is not a JWT
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Token header has no `kid`
    #[error("token header has no 'kid'")]
    MissingKeyId,
    /// `alg` is not one the gate accepts
    #[error("algorithm '{0}' is not accepted")]
    UnsupportedAlgorithm(String),
    /// `kid` is unknown even after a key refresh
    #[error("no verification key for kid '{0}'")]
    UnknownKey(String),
    /// Key exists but was published for a different algorithm
    #[error("key '{kid}' does not allow algorithm '{alg}'")]
    AlgorithmMismatch { kid: String, alg: String },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("untrusted issuer")]
    InvalidIssuer,
    #[error("audience mismatch")]
    InvalidAudience,
    #[error("missing required claim '{0}'")]
    MissingClaim(String),
    /// Anything else jsonwebtoken reports
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl AuthError {
    /// Short machine-readable label, used as a log field.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::Malformed(_) => "malformed",
            AuthError::MissingKeyId => "missing_kid",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_alg",
            AuthError::UnknownKey(_) => "unknown_kid",
            AuthError::AlgorithmMismatch { .. } => "alg_mismatch",
            AuthError::InvalidSignature => "bad_signature",
            AuthError::Expired => "expired",
            AuthError::NotYetValid => "not_yet_valid",
            AuthError::InvalidIssuer => "bad_issuer",
            AuthError::InvalidAudience => "bad_audience",
            AuthError::MissingClaim(_) => "missing_claim",
            AuthError::Rejected(_) => "rejected",
        }
    }

    /// Log the rejection with structured fields.
    pub fn log(&self, path: &str) {
        match self {
            AuthError::MissingToken => {
                debug!(path = %path, reason = self.reason(), "Rejected request without bearer token");
            }
            other => {
                warn!(path = %path, reason = other.reason(), error = %other, "Rejected bearer token");
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::ImmatureSignature => AuthError::NotYetValid,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm("mismatch".to_string()),
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed(err.to_string())
            }
            _ => AuthError::Rejected(err.to_string()),
        }
    }
}

/// Failure to obtain a key set from the identity provider.
#[derive(Debug, Error)]
pub enum KeyFetchError {
    #[error("key endpoint request failed: {0}")]
    Transport(String),
    #[error("key endpoint returned HTTP {0}")]
    Status(u16),
    #[error("key set is not valid JSON: {0}")]
    Parse(String),
    #[error("key set contains no usable keys")]
    Empty,
    /// Another caller's refresh did not finish in time
    #[error("timed out waiting for in-flight key refresh")]
    WaitTimeout,
    /// Refresh suppressed by the minimum refresh interval
    #[error("key refresh throttled")]
    Throttled,
}
