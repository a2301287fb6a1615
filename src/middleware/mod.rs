mod auth;
mod core;
mod cors;
mod tracing;

pub use self::auth::AuthMiddleware;
pub use self::core::{Middleware, MiddlewareChain};
pub use self::cors::{
    CorsConfigError, CorsDecision, CorsMiddleware, CorsMiddlewareBuilder, CorsPolicy, OriginPattern,
};
pub use self::tracing::TracingMiddleware;
