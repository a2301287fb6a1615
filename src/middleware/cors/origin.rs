use regex::Regex;
use url::Url;

use super::CorsConfigError;

/// One compiled allowed-origin entry.
#[derive(Debug, Clone)]
pub enum OriginPattern {
    /// Any origin (`*`)
    Any,
    /// A single origin, stored lowercased
    Exact(String),
    /// `scheme://host:*`: the host on any port
    AnyPort(Regex),
}

impl OriginPattern {
    /// Compile a configured origin.
    ///
    /// A wildcard is accepted only as the whole entry or as the whole port.
    pub fn parse(raw: &str) -> Result<Self, CorsConfigError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(OriginPattern::Any);
        }
        if let Some(base) = raw.strip_suffix(":*") {
            if base.contains('*') {
                return Err(CorsConfigError::UnsupportedWildcard {
                    origin: raw.to_string(),
                });
            }
            let (scheme, host) = split_origin(base, raw)?;
            if host.contains(':') && !host.starts_with('[') {
                return Err(CorsConfigError::InvalidOriginFormat {
                    origin: raw.to_string(),
                });
            }
            let pattern = format!(
                "(?i)^{}://{}(:[0-9]{{1,5}})?$",
                regex::escape(&scheme),
                regex::escape(&host)
            );
            let re = Regex::new(&pattern).map_err(|_| CorsConfigError::InvalidOriginFormat {
                origin: raw.to_string(),
            })?;
            return Ok(OriginPattern::AnyPort(re));
        }
        if raw.contains('*') {
            return Err(CorsConfigError::UnsupportedWildcard {
                origin: raw.to_string(),
            });
        }
        let (scheme, host) = split_origin(raw, raw)?;
        Ok(OriginPattern::Exact(format!("{scheme}://{host}")))
    }

    #[must_use]
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginPattern::Any => true,
            OriginPattern::Exact(allowed) => allowed.eq_ignore_ascii_case(origin),
            OriginPattern::AnyPort(re) => re.is_match(origin),
        }
    }
}

/// Validate `scheme://host[:port]` and return `(scheme, host[:port])` lowercased.
fn split_origin(value: &str, raw: &str) -> Result<(String, String), CorsConfigError> {
    let invalid = || CorsConfigError::InvalidOriginFormat {
        origin: raw.to_string(),
    };
    let (scheme, rest) = value.split_once("://").ok_or_else(invalid)?;
    if rest.is_empty() || rest.contains(['/', '?', '#', '@']) {
        return Err(invalid());
    }
    let url = Url::parse(value).map_err(|_| invalid())?;
    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok((scheme.to_ascii_lowercase(), rest.to_ascii_lowercase()))
}
