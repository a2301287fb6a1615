use http::Method;

use super::{CorsConfigError, CorsMiddleware, CorsPolicy, OriginPattern};

/// Builder for creating `CorsMiddleware` with a fluent API
///
/// # Example
///
/// ```rust
/// use bffgate::middleware::CorsMiddlewareBuilder;
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://app.example", "http://localhost:*"])
///     .allowed_methods(&[Method::GET, Method::POST, Method::OPTIONS])
///     .allowed_headers(&["*"])
///     .allow_credentials(true)
///     .expose_headers(&["Authorization"])
///     .max_age(3600)
///     .build()
///     .expect("valid CORS configuration");
/// assert!(cors.policy().allow_credentials());
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddlewareBuilder {
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
}

impl CorsMiddlewareBuilder {
    /// Create a new builder with secure defaults
    ///
    /// No origins are allowed until configured. Headers default to
    /// `Content-Type, Authorization`; methods to `GET, POST, PUT, DELETE, OPTIONS`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
        }
    }

    /// Set allowed origins: exact origins, `*`, or `scheme://host:*`.
    #[must_use]
    pub fn allowed_origins<S: AsRef<str>>(mut self, origins: &[S]) -> Self {
        self.allowed_origins = origins.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Parse method names from configuration.
    pub fn allowed_method_names<S: AsRef<str>>(mut self, methods: &[S]) -> Result<Self, CorsConfigError> {
        self.allowed_methods = methods
            .iter()
            .map(|m| {
                let name = m.as_ref().trim().to_ascii_uppercase();
                Method::from_bytes(name.as_bytes()).map_err(|_| CorsConfigError::InvalidMethod {
                    method: m.as_ref().to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Set allowed request headers; `*` echoes whatever the preflight asks for.
    #[must_use]
    pub fn allowed_headers<S: AsRef<str>>(mut self, headers: &[S]) -> Self {
        self.allowed_headers = headers.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Headers readable by browser scripts on non-preflight responses.
    #[must_use]
    pub fn expose_headers<S: AsRef<str>>(mut self, headers: &[S]) -> Self {
        self.expose_headers = headers.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Validate and build the immutable policy.
    ///
    /// # Errors
    ///
    /// - `WildcardWithCredentials` for `*` combined with credentials
    /// - `InvalidOriginFormat` / `UnsupportedWildcard` for malformed origins
    pub fn build_policy(self) -> Result<CorsPolicy, CorsConfigError> {
        let origins = self
            .allowed_origins
            .iter()
            .map(|o| OriginPattern::parse(o))
            .collect::<Result<Vec<_>, _>>()?;
        if self.allow_credentials && origins.iter().any(|o| matches!(o, OriginPattern::Any)) {
            return Err(CorsConfigError::WildcardWithCredentials);
        }
        Ok(CorsPolicy {
            origins,
            allowed_methods: self.allowed_methods,
            allowed_headers: self.allowed_headers,
            expose_headers: self.expose_headers,
            allow_credentials: self.allow_credentials,
            max_age: self.max_age,
        })
    }

    /// Build the CORS middleware. See [`build_policy`](Self::build_policy).
    pub fn build(self) -> Result<CorsMiddleware, CorsConfigError> {
        Ok(CorsMiddleware::new(self.build_policy()?))
    }
}

impl Default for CorsMiddlewareBuilder {
    fn default() -> Self {
        Self::new()
    }
}
