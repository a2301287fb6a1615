//! Bearer-token authentication.
//!
//! - [`RouteAuthPolicy`] decides which paths need a token (fail-closed)
//! - [`KeyCache`] holds the issuer's signing keys with coalesced refresh
//! - [`TokenVerifier`] turns a bearer token into a [`VerifiedIdentity`]

mod error;
mod identity;
mod jwks;
mod route_policy;
mod verifier;

pub use self::error::{AuthError, KeyFetchError};
pub use self::identity::VerifiedIdentity;
pub use self::jwks::{
    HttpKeySource, KeyCache, KeyCacheConfig, KeyCacheStats, KeySet, KeySource, VerificationKey,
};
pub use self::route_policy::{Access, RouteAuthPolicy, RoutePatternError, RouteRule};
pub use self::verifier::{default_jwks_url, TokenVerifier, TrustedIssuer};
