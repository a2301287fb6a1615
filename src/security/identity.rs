use serde::Serialize;
use serde_json::Value;

/// The caller identity established by a successfully verified bearer token.
///
/// Built fresh for every request from that request's own token. It is never
/// cached and never outlives the request it was attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    /// `sub` claim
    pub subject: String,
    /// `iss` claim (always equal to the trusted issuer)
    pub issuer: String,
    /// Role/authority claims taken from the configured roles claim
    pub roles: Vec<String>,
    /// OAuth2 scopes from `scope` (space separated) or `scp` (array)
    pub scopes: Vec<String>,
    /// `exp` claim, unix seconds
    pub expires_at: u64,
}

impl VerifiedIdentity {
    /// Build an identity from already-verified claims.
    ///
    /// Returns `None` when `sub` is missing or empty.
    #[must_use]
    pub fn from_claims(claims: &Value, roles_claim: &str) -> Option<Self> {
        let subject = claims.get("sub")?.as_str()?.trim();
        if subject.is_empty() {
            return None;
        }
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let expires_at = claims.get("exp").and_then(Value::as_u64).unwrap_or(0);
        let roles = claims
            .get(roles_claim)
            .map(string_list)
            .unwrap_or_default();
        let scopes = claims
            .get("scope")
            .or_else(|| claims.get("scp"))
            .map(string_list)
            .unwrap_or_default();

        Some(Self {
            subject: subject.to_string(),
            issuer,
            roles,
            scopes,
            expires_at,
        })
    }

    /// Whether the identity carries the given role (exact match).
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Accept either a JSON array of strings or a single space-separated string.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
