use thiserror::Error;

/// CORS configuration error
///
/// Returned by `CorsMiddlewareBuilder::build()` when the configuration is
/// invalid. These are startup errors only; nothing at request time produces one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorsConfigError {
    /// Wildcard origin (`*`) cannot be used with credentials
    #[error(
        "CORS configuration error: Cannot use wildcard origin (*) with credentials. \
         When allow_credentials is true, you must specify exact origins."
    )]
    WildcardWithCredentials,
    /// The origin is not `scheme://host[:port]`
    #[error(
        "CORS configuration error: Invalid origin format '{origin}'. \
         Expected format: scheme://host[:port] (e.g., https://example.com)"
    )]
    InvalidOriginFormat { origin: String },
    /// A `*` somewhere other than the whole origin or the whole port
    #[error(
        "CORS configuration error: Unsupported wildcard in origin pattern '{origin}'. \
         Only '*' or 'scheme://host:*' are accepted."
    )]
    UnsupportedWildcard { origin: String },
    /// A configured method name is not a valid HTTP method token
    #[error("CORS configuration error: Invalid method '{method}'")]
    InvalidMethod { method: String },
}
