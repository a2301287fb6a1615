//! CORS Decision Filter behaviour through the full pipeline.
//!
//! Preflights are answered before authentication, so none of these requests
//! carry a token unless the test says so, and none of them reach the upstream.

use bffgate::gateway::GatewayRequest;
use http::Method;

mod common;
use common::{
    gateway_config, service, token_for, MockJwks, MockUpstream, ALLOWED_ORIGIN, DENIED_ORIGIN,
    KID_A, SECRET_A,
};

struct Fixture {
    _jwks: MockJwks,
    upstream: MockUpstream,
    service: std::sync::Arc<bffgate::GatewayService>,
}

fn fixture() -> Fixture {
    let jwks = MockJwks::start(&[(KID_A, SECRET_A)]);
    let upstream = MockUpstream::start();
    let service = service(&gateway_config(&jwks.url(), &upstream.url()));
    Fixture {
        _jwks: jwks,
        upstream,
        service,
    }
}

fn preflight(path: &str, origin: &str) -> GatewayRequest {
    GatewayRequest::new(Method::OPTIONS, path)
        .with_header("Origin", origin)
        .with_header("Access-Control-Request-Method", "POST")
        .with_header("Access-Control-Request-Headers", "Authorization, Content-Type")
}

#[test]
fn test_preflight_allowed_origin_without_token() {
    let f = fixture();
    let res = f.service.handle(preflight("/api/v1/providers", ALLOWED_ORIGIN));

    assert_eq!(res.status, 200);
    assert_eq!(res.get_header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(res.get_header("access-control-allow-credentials"), Some("true"));
    assert_eq!(
        res.get_header("access-control-allow-headers"),
        Some("Authorization, Content-Type")
    );
    assert!(res
        .get_header("access-control-allow-methods")
        .unwrap()
        .contains("POST"));
    assert_eq!(res.get_header("access-control-max-age"), Some("3600"));
    assert_eq!(f.upstream.hits(), 0);
}

#[test]
fn test_preflight_allowed_origin_with_token_is_identical() {
    let f = fixture();
    let token = format!("Bearer {}", token_for("user-1"));
    let with_token = f
        .service
        .handle(preflight("/api/v1/providers", ALLOWED_ORIGIN).with_header("Authorization", token));
    let without = f.service.handle(preflight("/api/v1/providers", ALLOWED_ORIGIN));

    assert_eq!(with_token.status, without.status);
    assert_eq!(
        with_token.get_header("access-control-allow-origin"),
        without.get_header("access-control-allow-origin")
    );
    assert_eq!(f.upstream.hits(), 0);
}

#[test]
fn test_preflight_with_garbage_token_not_rejected() {
    let f = fixture();
    let res = f.service.handle(
        preflight("/api/v1/providers", ALLOWED_ORIGIN).with_header("Authorization", "Bearer nope"),
    );
    assert_eq!(res.status, 200);
    assert_eq!(res.get_header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
}

#[test]
fn test_preflight_denied_origin_gets_no_cors_headers() {
    let f = fixture();
    let res = f.service.handle(preflight("/api/v1/providers", DENIED_ORIGIN));

    assert_eq!(res.status, 200);
    assert!(res.get_header("access-control-allow-origin").is_none());
    assert!(res.get_header("access-control-allow-credentials").is_none());
    assert_eq!(f.upstream.hits(), 0);
}

#[test]
fn test_any_port_on_localhost_allowed() {
    let f = fixture();
    for origin in ["http://localhost:5173", "http://localhost:8100", "http://localhost"] {
        let res = f.service.handle(preflight("/api/x", origin));
        assert_eq!(
            res.get_header("access-control-allow-origin"),
            Some(origin),
            "origin {origin}"
        );
    }
}

#[test]
fn test_lookalike_origins_denied() {
    let f = fixture();
    for origin in [
        "https://localhost:4200",
        "http://localhost.evil.example",
        "http://evil.example:4200",
        "https://aquaconecta-ase.netlify.app.evil.example",
        "null",
    ] {
        let res = f.service.handle(preflight("/api/x", origin));
        assert!(
            res.get_header("access-control-allow-origin").is_none(),
            "origin {origin} should be denied"
        );
    }
}

#[test]
fn test_deployed_frontend_origin_allowed() {
    let f = fixture();
    let res = f
        .service
        .handle(preflight("/api/x", "https://aquaconecta-ase.netlify.app"));
    assert_eq!(
        res.get_header("access-control-allow-origin"),
        Some("https://aquaconecta-ase.netlify.app")
    );
}

#[test]
fn test_disallowed_request_method_denied() {
    let f = fixture();
    let req = GatewayRequest::new(Method::OPTIONS, "/api/x")
        .with_header("Origin", ALLOWED_ORIGIN)
        .with_header("Access-Control-Request-Method", "TRACE");
    let res = f.service.handle(req);
    assert_eq!(res.status, 200);
    assert!(res.get_header("access-control-allow-origin").is_none());
}

#[test]
fn test_unauthorized_response_still_carries_cors_headers() {
    let f = fixture();
    let req = GatewayRequest::new(Method::GET, "/api/v1/providers").with_header("Origin", ALLOWED_ORIGIN);
    let res = f.service.handle(req);

    assert_eq!(res.status, 401);
    assert_eq!(res.get_header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(res.get_header("vary"), Some("Origin"));
    assert!(res
        .get_header("access-control-expose-headers")
        .unwrap()
        .contains("X-Client-Type"));
}

#[test]
fn test_simple_request_from_denied_origin_proceeds_without_cors_headers() {
    let f = fixture();
    let req = GatewayRequest::new(Method::GET, "/fallback").with_header("Origin", DENIED_ORIGIN);
    let res = f.service.handle(req);

    assert_eq!(res.status, 503);
    assert!(res.get_header("access-control-allow-origin").is_none());
}

#[test]
fn test_admitted_request_decorated() {
    let f = fixture();
    let req = GatewayRequest::new(Method::GET, "/api/v1/providers")
        .with_header("Origin", ALLOWED_ORIGIN)
        .with_header("Authorization", format!("Bearer {}", token_for("user-7")));
    let res = f.service.handle(req);

    assert_eq!(res.status, 200);
    assert_eq!(res.get_header("x-upstream"), Some("mock"));
    assert_eq!(res.get_header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(f.upstream.hits(), 1);
}

#[test]
fn test_backend_cors_headers_do_not_reach_denied_origin() {
    let f = fixture();
    let req = GatewayRequest::new(Method::GET, "/permissive/resource")
        .with_header("Origin", DENIED_ORIGIN)
        .with_header("Authorization", format!("Bearer {}", token_for("user-7")));
    let res = f.service.handle(req);

    assert_eq!(res.status, 200);
    assert_eq!(f.upstream.hits(), 1);
    assert_eq!(res.get_header("x-upstream"), Some("mock"));
    assert!(res.get_header("access-control-allow-origin").is_none());
    assert!(res.get_header("access-control-allow-credentials").is_none());
    assert_eq!(res.get_header("vary"), Some("Accept-Encoding"));
}

#[test]
fn test_backend_cors_headers_replaced_for_allowed_origin() {
    let f = fixture();
    let req = GatewayRequest::new(Method::GET, "/permissive/resource")
        .with_header("Origin", ALLOWED_ORIGIN)
        .with_header("Authorization", format!("Bearer {}", token_for("user-7")));
    let res = f.service.handle(req);

    assert_eq!(res.status, 200);
    assert_eq!(res.get_header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(res.get_header("vary"), Some("Accept-Encoding, Origin"));
}

#[test]
fn test_options_without_origin_answered_locally() {
    let f = fixture();
    let res = f.service.handle(GatewayRequest::new(Method::OPTIONS, "/api/x"));
    assert_eq!(res.status, 200);
    assert!(res.get_header("access-control-allow-origin").is_none());
    assert_eq!(f.upstream.hits(), 0);
}
