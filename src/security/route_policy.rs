//! Path classification for the authentication gate.
//!
//! Rules are evaluated first-match-wins in declaration order. A path that no
//! rule matches is [`Access::Authenticated`]: the policy is fail-closed and an
//! empty rule list protects everything.

use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of classifying a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Admitted without inspecting credentials
    Public,
    /// Requires a verified bearer token
    Authenticated,
}

/// Invalid rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutePatternError {
    #[error("route pattern '{0}' must start with '/'")]
    NotAbsolute(String),
    #[error("route pattern '{0}' may only use '*' or '**' as its final segment")]
    MisplacedWildcard(String),
    #[error("route rule for '{pattern}' has invalid method '{method}'")]
    InvalidMethod { pattern: String, method: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    /// `/fallback` (a single trailing slash on the request is tolerated)
    Exact(String),
    /// `/actuator/*`: exactly one more non-empty segment
    OneSegment(String),
    /// `/actuator/**`: the base itself or anything below it
    AnyDepth(String),
}

impl PathPattern {
    fn parse(raw: &str) -> Result<Self, RoutePatternError> {
        if !raw.starts_with('/') {
            return Err(RoutePatternError::NotAbsolute(raw.to_string()));
        }
        let (base, pattern): (&str, fn(String) -> PathPattern) =
            if let Some(base) = raw.strip_suffix("/**") {
                (base, PathPattern::AnyDepth)
            } else if let Some(base) = raw.strip_suffix("/*") {
                (base, PathPattern::OneSegment)
            } else {
                (raw, PathPattern::Exact)
            };
        if base.contains('*') {
            return Err(RoutePatternError::MisplacedWildcard(raw.to_string()));
        }
        let base = base.trim_end_matches('/');
        Ok(pattern(base.to_string()))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => {
                let trimmed = path.strip_suffix('/').filter(|t| !t.is_empty()).unwrap_or(path);
                if p.is_empty() {
                    path == "/"
                } else {
                    trimmed == p
                }
            }
            PathPattern::OneSegment(base) => path
                .strip_prefix(base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| {
                    let rest = rest.strip_suffix('/').unwrap_or(rest);
                    !rest.is_empty() && !rest.contains('/')
                })
                .unwrap_or(false),
            PathPattern::AnyDepth(base) => {
                if base.is_empty() {
                    return true;
                }
                match path.strip_prefix(base.as_str()) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                }
            }
        }
    }
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    raw: String,
    pattern: PathPattern,
    methods: Option<Vec<Method>>,
    access: Access,
}

impl RouteRule {
    /// Create a rule applying to every method.
    pub fn new(pattern: &str, access: Access) -> Result<Self, RoutePatternError> {
        Ok(Self {
            raw: pattern.to_string(),
            pattern: PathPattern::parse(pattern)?,
            methods: None,
            access,
        })
    }

    /// Restrict the rule to the given methods.
    #[must_use]
    pub fn for_methods(mut self, methods: &[Method]) -> Self {
        self.methods = Some(methods.to_vec());
        self
    }

    /// Create a rule from configuration strings.
    pub fn from_parts(
        pattern: &str,
        methods: &[String],
        access: Access,
    ) -> Result<Self, RoutePatternError> {
        let rule = Self::new(pattern, access)?;
        if methods.is_empty() {
            return Ok(rule);
        }
        let parsed = methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                    RoutePatternError::InvalidMethod {
                        pattern: pattern.to_string(),
                        method: m.clone(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rule.for_methods(&parsed))
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(methods) = &self.methods {
            if !methods.contains(method) {
                return false;
            }
        }
        self.pattern.matches(path)
    }

    /// The pattern as configured.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }
}

/// Ordered, immutable set of classification rules.
#[derive(Debug, Clone, Default)]
pub struct RouteAuthPolicy {
    rules: Vec<RouteRule>,
}

impl RouteAuthPolicy {
    #[must_use]
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The public surface of the web gateway: every preflight, the actuator
    /// endpoints and the circuit-breaker fallback.
    pub fn gateway_default() -> Result<Self, RoutePatternError> {
        Ok(Self::new(vec![
            RouteRule::new("/**", Access::Public)?.for_methods(&[Method::OPTIONS]),
            RouteRule::new("/actuator/**", Access::Public)?,
            RouteRule::new("/fallback", Access::Public)?,
        ]))
    }

    /// Classify a normalized path. No matching rule means `Authenticated`.
    #[must_use]
    pub fn classify(&self, method: &Method, path: &str) -> Access {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(|rule| rule.access)
            .unwrap_or(Access::Authenticated)
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}
