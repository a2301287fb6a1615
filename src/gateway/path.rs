//! Request path normalization.
//!
//! Route classification and upstream forwarding both operate on the
//! normalized path, so `/actuator/../admin` is classified as `/admin` and not
//! as a public actuator path.

use thiserror::Error;

/// Reasons a request path is refused before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("request path must start with '/'")]
    NotAbsolute,
    #[error("request path contains an encoded separator or dot segment")]
    EncodedSeparator,
    #[error("request path contains a control character or backslash")]
    IllegalCharacter,
    #[error("request path escapes the root")]
    EscapesRoot,
}

const ENCODED_SEQUENCES: [&str; 3] = ["%2e", "%2f", "%5c"];

/// Normalize a raw request path (query already stripped).
///
/// Collapses empty and `.` segments, resolves `..`, and keeps a trailing
/// slash when the input had one.
pub fn normalize_path(raw: &str) -> Result<String, PathError> {
    if !raw.starts_with('/') {
        return Err(PathError::NotAbsolute);
    }
    if raw.chars().any(|c| c.is_control() || c == '\\') {
        return Err(PathError::IllegalCharacter);
    }
    let lowered = raw.to_ascii_lowercase();
    if ENCODED_SEQUENCES.iter().any(|seq| lowered.contains(seq)) {
        return Err(PathError::EncodedSeparator);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesRoot);
                }
            }
            s => segments.push(s),
        }
    }

    let mut normalized = String::with_capacity(raw.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    } else if raw.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
