mod core;
mod path;

pub use self::core::{GatewayRequest, GatewayResponse, HeaderVec, MAX_INLINE_HEADERS};
pub use self::path::{normalize_path, PathError};
