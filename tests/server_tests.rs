//! End-to-end through the HTTP server.

use bffgate::fallback::FALLBACK_BODY;
use bffgate::ids::RequestId;

mod common;
use common::{
    gateway_config, token_for, MockJwks, MockUpstream, TestGateway, ALLOWED_ORIGIN, DENIED_ORIGIN,
    KID_A, SECRET_A, UNREACHABLE_UPSTREAM,
};

fn gateway(upstream_url: &str) -> (MockJwks, TestGateway) {
    let jwks = MockJwks::start(&[(KID_A, SECRET_A)]);
    let gateway = TestGateway::start(&gateway_config(&jwks.url(), upstream_url));
    (jwks, gateway)
}

#[test]
fn test_health_endpoint() {
    let upstream = MockUpstream::start();
    let (_jwks, gw) = gateway(&upstream.url());
    let res = gw.request("GET", "/actuator/health", &[]);

    assert_eq!(res.status, 200);
    assert!(res.header("content-type").unwrap().starts_with("application/json"));
    let body = res.json();
    assert_eq!(body["status"], "UP");
    assert_eq!(body["components"]["upstream"]["circuit"], "closed");
    assert_eq!(body["components"]["jwks"]["keys"], 1);
}

#[test]
fn test_preflight_over_the_wire() {
    let upstream = MockUpstream::start();
    let (_jwks, gw) = gateway(&upstream.url());
    let allowed = gw.request(
        "OPTIONS",
        "/api/v1/providers",
        &[
            ("Origin", ALLOWED_ORIGIN),
            ("Access-Control-Request-Method", "PUT"),
            ("Access-Control-Request-Headers", "authorization,x-client-type"),
        ],
    );
    assert_eq!(allowed.status, 200);
    assert_eq!(allowed.header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(allowed.header("access-control-allow-credentials"), Some("true"));

    let denied = gw.request(
        "OPTIONS",
        "/api/v1/providers",
        &[("Origin", DENIED_ORIGIN), ("Access-Control-Request-Method", "PUT")],
    );
    assert_eq!(denied.status, 200);
    assert!(denied.header("access-control-allow-origin").is_none());
    assert_eq!(upstream.hits(), 0);
}

#[test]
fn test_authenticated_request_proxied() {
    let upstream = MockUpstream::start();
    let (_jwks, gw) = gateway(&upstream.url());
    let auth = format!("Bearer {}", token_for("provider-1"));
    let res = gw.request_with_body(
        "POST",
        "/api/v1/readings?station=7",
        &[("Authorization", auth.as_str()), ("Content-Type", "application/json")],
        r#"{"ph":7.1}"#,
    );

    assert_eq!(res.status, 200);
    assert_eq!(res.header("x-upstream"), Some("mock"));
    let echo = res.json();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["url"], "/api/v1/readings?station=7");
    assert_eq!(echo["subject"], "provider-1");
    assert_eq!(echo["body"], r#"{"ph":7.1}"#);
    assert_eq!(echo["forwarded_for"], "127.0.0.1");

    let request_id = res.header("x-request-id").unwrap();
    assert!(request_id.parse::<RequestId>().is_ok());
    assert_eq!(echo["request_id"], request_id);
}

#[test]
fn test_inbound_request_id_honoured() {
    let upstream = MockUpstream::start();
    let (_jwks, gw) = gateway(&upstream.url());
    let id = RequestId::new().to_string();
    let res = gw.request("GET", "/fallback", &[("X-Request-Id", id.as_str())]);
    assert_eq!(res.header("x-request-id"), Some(id.as_str()));

    let res = gw.request("GET", "/fallback", &[("X-Request-Id", "not-a-ulid")]);
    assert_ne!(res.header("x-request-id"), Some("not-a-ulid"));
}

#[test]
fn test_missing_token_over_the_wire() {
    let upstream = MockUpstream::start();
    let (_jwks, gw) = gateway(&upstream.url());
    let res = gw.request("GET", "/api/v1/providers", &[("Origin", ALLOWED_ORIGIN)]);

    assert_eq!(res.status, 401);
    assert_eq!(res.json(), serde_json::json!({ "error": "Unauthorized" }));
    assert_eq!(res.header("www-authenticate"), Some("Bearer"));
    assert_eq!(res.header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
}

#[test]
fn test_unreachable_upstream_returns_fallback_with_cors() {
    let (_jwks, gw) = gateway(UNREACHABLE_UPSTREAM);
    let auth = format!("Bearer {}", token_for("user-1"));
    let res = gw.request(
        "GET",
        "/api/v1/providers",
        &[("Authorization", auth.as_str()), ("Origin", ALLOWED_ORIGIN)],
    );

    assert_eq!(res.status, 503);
    assert_eq!(res.body, FALLBACK_BODY);
    assert_eq!(res.header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
}

#[test]
fn test_oversized_body_rejected() {
    let upstream = MockUpstream::start();
    let jwks = MockJwks::start(&[(KID_A, SECRET_A)]);
    let mut config = gateway_config(&jwks.url(), &upstream.url());
    config.server.max_body_bytes = 16;
    let gw = TestGateway::start(&config);

    let auth = format!("Bearer {}", token_for("user-1"));
    let res = gw.request_with_body(
        "POST",
        "/api/v1/readings",
        &[("Authorization", auth.as_str())],
        "this body is definitely longer than sixteen bytes",
    );
    assert_eq!(res.status, 413);
    assert_eq!(upstream.hits(), 0);
}

#[test]
fn test_oversized_body_response_is_cors_decorated() {
    let upstream = MockUpstream::start();
    let jwks = MockJwks::start(&[(KID_A, SECRET_A)]);
    let mut config = gateway_config(&jwks.url(), &upstream.url());
    config.server.max_body_bytes = 16;
    let gw = TestGateway::start(&config);

    let id = RequestId::new().to_string();
    let res = gw.request_with_body(
        "POST",
        "/api/v1/readings",
        &[("Origin", ALLOWED_ORIGIN), ("X-Request-Id", id.as_str())],
        "this body is definitely longer than sixteen bytes",
    );
    assert_eq!(res.status, 413);
    assert_eq!(res.header("access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(res.header("x-request-id"), Some(id.as_str()));
    assert_eq!(res.json()["error"], "Payload Too Large");

    let res = gw.request_with_body(
        "POST",
        "/api/v1/readings",
        &[("Origin", DENIED_ORIGIN)],
        "this body is definitely longer than sixteen bytes",
    );
    assert_eq!(res.status, 413);
    assert!(res.header("access-control-allow-origin").is_none());
}
