use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::Value;

use super::error::AuthError;
use super::identity::VerifiedIdentity;
use super::jwks::KeyCache;

/// Claims every accepted token must carry.
const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// Verification material for bearer tokens from one identity provider.
#[derive(Debug, Clone)]
pub struct TrustedIssuer {
    /// Exact expected `iss`
    pub issuer: String,
    /// Key-set endpoint
    pub jwks_url: String,
    /// Accepted `aud` values; a token must carry at least one
    pub audiences: Vec<String>,
    /// Accepted signing algorithms
    pub algorithms: Vec<Algorithm>,
    /// Clock skew tolerance for `exp`/`nbf`
    pub leeway_secs: u64,
    /// Claim holding role names
    pub roles_claim: String,
}

impl TrustedIssuer {
    #[must_use]
    pub fn new(issuer: impl Into<String>, audiences: Vec<String>) -> Self {
        let issuer = issuer.into();
        Self {
            jwks_url: default_jwks_url(&issuer),
            issuer,
            audiences,
            algorithms: vec![Algorithm::RS256],
            leeway_secs: 60,
            roles_claim: "roles".to_string(),
        }
    }

    #[must_use]
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    #[must_use]
    pub fn with_roles_claim(mut self, claim: impl Into<String>) -> Self {
        self.roles_claim = claim.into();
        self
    }
}

/// `<issuer>/.well-known/jwks.json`, tolerating a trailing slash on the issuer.
#[must_use]
pub fn default_jwks_url(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}

/// Verifies bearer tokens against a [`TrustedIssuer`] using keys from a shared
/// [`KeyCache`].
///
/// Holds no per-request state; one instance serves every worker.
pub struct TokenVerifier {
    issuer: TrustedIssuer,
    keys: Arc<KeyCache>,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(issuer: TrustedIssuer, keys: Arc<KeyCache>) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer.issuer.as_str()]);
        validation.set_audience(issuer.audiences.as_slice());
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.leeway = issuer.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        Self {
            issuer,
            keys,
            validation,
        }
    }

    /// Verify a compact JWS and return the identity it carries.
    ///
    /// An unknown `kid` triggers at most one coalesced key refresh before the
    /// token is rejected.
    pub fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if !self.issuer.algorithms.contains(&header.alg) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        let kid = header
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingKeyId)?;

        let key = self
            .keys
            .lookup_or_refresh(kid)
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?;
        if let Some(published) = key.algorithm {
            if published != header.alg {
                return Err(AuthError::AlgorithmMismatch {
                    kid: kid.to_string(),
                    alg: format!("{:?}", header.alg),
                });
            }
        }

        let mut validation = self.validation.clone();
        validation.algorithms = vec![header.alg];
        let data = decode::<Value>(token, &key.key, &validation)?;

        VerifiedIdentity::from_claims(&data.claims, &self.issuer.roles_claim)
            .ok_or_else(|| AuthError::MissingClaim("sub".to_string()))
    }

    #[must_use]
    pub fn issuer(&self) -> &TrustedIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::jwks::{KeyCacheConfig, KeySet, KeySource, VerificationKey};
    use crate::security::KeyFetchError;
    use jsonwebtoken::{encode, DecodingKey, EncodingKey, Header};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"unit-test-secret";

    struct FixedKeys;

    impl KeySource for FixedKeys {
        fn fetch(&self) -> Result<KeySet, KeyFetchError> {
            Ok(KeySet::from_keys([(
                "k1".to_string(),
                VerificationKey {
                    key: DecodingKey::from_secret(SECRET),
                    algorithm: Some(Algorithm::HS256),
                },
            )]))
        }

        fn describe(&self) -> &str {
            "fixed"
        }
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn verifier() -> TokenVerifier {
        let cache = Arc::new(KeyCache::new(FixedKeys, KeyCacheConfig::default()));
        let issuer = TrustedIssuer::new("https://issuer.test/", vec!["api".to_string()])
            .with_algorithms(vec![Algorithm::HS256]);
        TokenVerifier::new(issuer, cache)
    }

    fn token(kid: Option<&str>, claims: Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn claims() -> Value {
        json!({"sub": "user-1", "iss": "https://issuer.test/", "aud": "api", "exp": now() + 600, "roles": ["ROLE_CLIENT"]})
    }

    #[test]
    fn test_valid_token() {
        let id = verifier().verify(&token(Some("k1"), claims())).unwrap();
        assert_eq!(id.subject, "user-1");
        assert!(id.has_role("ROLE_CLIENT"));
    }

    #[test]
    fn test_rejections() {
        let v = verifier();
        assert_eq!(v.verify("garbage").unwrap_err().reason(), "malformed");
        assert_eq!(v.verify(&token(None, claims())).unwrap_err(), AuthError::MissingKeyId);

        let mut expired = claims();
        expired["exp"] = json!(now() - 3600);
        assert_eq!(v.verify(&token(Some("k1"), expired)).unwrap_err(), AuthError::Expired);

        let mut wrong_iss = claims();
        wrong_iss["iss"] = json!("https://evil.test/");
        assert_eq!(v.verify(&token(Some("k1"), wrong_iss)).unwrap_err(), AuthError::InvalidIssuer);

        let mut wrong_aud = claims();
        wrong_aud["aud"] = json!("other");
        assert_eq!(v.verify(&token(Some("k1"), wrong_aud)).unwrap_err(), AuthError::InvalidAudience);

        let mut no_sub = claims();
        no_sub.as_object_mut().unwrap().remove("sub");
        assert_eq!(
            v.verify(&token(Some("k1"), no_sub)).unwrap_err(),
            AuthError::MissingClaim("sub".to_string())
        );
    }

    #[test]
    fn test_algorithm_not_accepted() {
        let mut header = Header::new(Algorithm::HS384);
        header.kid = Some("k1".to_string());
        let t = encode(&header, &claims(), &EncodingKey::from_secret(SECRET)).unwrap();
        assert!(matches!(verifier().verify(&t), Err(AuthError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_default_jwks_url() {
        assert_eq!(
            TrustedIssuer::new("https://tenant.auth0.com/", vec![]).jwks_url,
            "https://tenant.auth0.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn test_leeway_admits_recently_expired() {
        let mut c = claims();
        c["exp"] = json!(now() - 10);
        assert!(verifier().verify(&token(Some("k1"), c)).is_ok());
    }
}
