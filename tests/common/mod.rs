#![allow(dead_code)]

//! Shared fixtures: a counting mock JWKS endpoint, an echoing mock upstream,
//! HS256 token minting and a raw-socket HTTP client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use bffgate::config::GatewayConfig;
use bffgate::server::{GatewayService, HttpServer, ServerHandle};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

pub const ISSUER: &str = "https://id.aquaconecta.test";
pub const AUDIENCE: &str = "aquaconecta-web";
pub const KID_A: &str = "key-a";
pub const KID_B: &str = "key-b";
pub const SECRET_A: &[u8] = b"signing-secret-a-0123456789abcdef";
pub const SECRET_B: &[u8] = b"signing-secret-b-fedcba9876543210";
pub const ALLOWED_ORIGIN: &str = "http://localhost:4200";
pub const DENIED_ORIGIN: &str = "https://evil.example";

/// Port 9 on loopback refuses connections immediately.
pub const UNREACHABLE_UPSTREAM: &str = "http://127.0.0.1:9";

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Claims the gateway accepts, for `sub`.
pub fn claims(sub: &str) -> Value {
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": sub,
        "iat": now(),
        "exp": now() + 300,
        "roles": ["ROLE_PROVIDER"],
    })
}

pub fn mint(secret: &[u8], kid: &str, claims: &Value) -> String {
    let header = Header {
        kid: Some(kid.to_string()),
        alg: Algorithm::HS256,
        ..Default::default()
    };
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

/// Valid token for `sub` signed with key A.
pub fn token_for(sub: &str) -> String {
    mint(SECRET_A, KID_A, &claims(sub))
}

pub fn jwks_json(keys: &[(&str, &[u8])]) -> String {
    let keys: Vec<Value> = keys
        .iter()
        .map(|(kid, secret)| {
            json!({
                "kty": "oct",
                "kid": kid,
                "alg": "HS256",
                "use": "sig",
                "k": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret),
            })
        })
        .collect();
    json!({ "keys": keys }).to_string()
}

// ---------------------------------------------------------------------------
// Mock JWKS endpoint
// ---------------------------------------------------------------------------

/// Serves a swappable key set and counts fetches.
pub struct MockJwks {
    addr: SocketAddr,
    body: Arc<Mutex<String>>,
    fetches: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
    failing: Arc<AtomicBool>,
}

impl MockJwks {
    pub fn start(keys: &[(&str, &[u8])]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mock = Self {
            addr,
            body: Arc::new(Mutex::new(jwks_json(keys))),
            fetches: Arc::new(AtomicUsize::new(0)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            failing: Arc::new(AtomicBool::new(false)),
        };
        let body = Arc::clone(&mock.body);
        let fetches = Arc::clone(&mock.fetches);
        let delay = Arc::clone(&mock.delay);
        let failing = Arc::clone(&mock.failing);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let body = Arc::clone(&body);
                let fetches = Arc::clone(&fetches);
                let delay = Arc::clone(&delay);
                let failing = Arc::clone(&failing);
                thread::spawn(move || {
                    if read_request_head(&mut stream).is_none() {
                        return;
                    }
                    fetches.fetch_add(1, Ordering::SeqCst);
                    let pause = *delay.lock().unwrap();
                    if !pause.is_zero() {
                        thread::sleep(pause);
                    }
                    let resp = if failing.load(Ordering::SeqCst) {
                        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    } else {
                        let body = body.lock().unwrap().clone();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    };
                    let _ = stream.write_all(resp.as_bytes());
                });
            }
        });
        mock
    }

    pub fn url(&self) -> String {
        format!("http://{}/.well-known/jwks.json", self.addr)
    }

    pub fn set_keys(&self, keys: &[(&str, &[u8])]) {
        *self.body.lock().unwrap() = jwks_json(keys);
    }

    /// Slow every response down, widening the window for concurrent misses.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn read_request_head(stream: &mut TcpStream) -> Option<Vec<u8>> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .ok()?;
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = stream.read(&mut tmp).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock upstream
// ---------------------------------------------------------------------------

/// CORS headers a misconfigured backend might send.
const PERMISSIVE_CORS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Credentials", "true"),
    ("Vary", "Accept-Encoding, Origin"),
];

/// Echoes what the gateway forwarded as JSON. `/status/<code>` answers with
/// that status instead of 200; `/permissive/...` adds wide-open CORS headers.
pub struct MockUpstream {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    hits: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn start() -> Self {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let server = Arc::clone(&server);
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                for mut rq in server.incoming_requests() {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let mut body = String::new();
                    let _ = rq.as_reader().read_to_string(&mut body);
                    let header = |name: &str| {
                        rq.headers()
                            .iter()
                            .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                            .map(|h| h.value.as_str().to_string())
                    };
                    let echo = json!({
                        "method": rq.method().as_str(),
                        "url": rq.url(),
                        "subject": header("X-Authenticated-Subject"),
                        "roles": header("X-Authenticated-Roles"),
                        "request_id": header("X-Request-Id"),
                        "forwarded_for": header("X-Forwarded-For"),
                        "authorization": header("Authorization"),
                        "body": body,
                    });
                    let status = rq
                        .url()
                        .strip_prefix("/status/")
                        .and_then(|s| s.parse::<u16>().ok())
                        .unwrap_or(200);
                    let mut response = tiny_http::Response::from_string(echo.to_string())
                        .with_status_code(status)
                        .with_header(
                            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                                .unwrap(),
                        )
                        .with_header(
                            tiny_http::Header::from_bytes(&b"X-Upstream"[..], &b"mock"[..]).unwrap(),
                        );
                    if rq.url().starts_with("/permissive") {
                        for (name, value) in PERMISSIVE_CORS {
                            response.add_header(
                                tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes())
                                    .unwrap(),
                            );
                        }
                    }
                    let _ = rq.respond(response);
                }
            });
        }
        Self { addr, server, hits }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        for _ in 0..4 {
            self.server.unblock();
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway fixtures
// ---------------------------------------------------------------------------

/// Configuration trusting [`ISSUER`] with keys from `jwks_url`.
pub fn gateway_config(jwks_url: &str, upstream_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.auth.issuer = ISSUER.to_string();
    config.auth.audiences = vec![AUDIENCE.to_string()];
    config.auth.jwks_url = Some(jwks_url.to_string());
    config.auth.algorithms = vec!["HS256".to_string()];
    config.auth.leeway_secs = 0;
    config.auth.min_refresh_interval_ms = 0;
    config.upstream.base_url = upstream_url.to_string();
    config.upstream.timeout_ms = 2000;
    config.upstream.circuit_breaker.failure_threshold = 3;
    config.upstream.circuit_breaker.recovery_timeout_secs = 60;
    config
}

pub fn service(config: &GatewayConfig) -> Arc<GatewayService> {
    Arc::new(GatewayService::from_config(config).unwrap())
}

/// A gateway on an ephemeral port, stopped on drop.
pub struct TestGateway {
    handle: Option<ServerHandle>,
    addr: SocketAddr,
    service: Arc<GatewayService>,
}

impl TestGateway {
    pub fn start(config: &GatewayConfig) -> Self {
        let service = service(config);
        let handle = HttpServer::new(Arc::clone(&service))
            .with_workers(8)
            .start(config.server.bind.as_str())
            .unwrap();
        handle.wait_ready().unwrap();
        Self {
            addr: handle.addr(),
            handle: Some(handle),
            service,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn service(&self) -> &Arc<GatewayService> {
        &self.service
    }

    pub fn request(&self, method: &str, path: &str, headers: &[(&str, &str)]) -> HttpResponse {
        self.request_with_body(method, path, headers, "")
    }

    pub fn request_with_body(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> HttpResponse {
        let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        parse_response(&send_request(&self.addr, &raw))
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Raw HTTP client
// ---------------------------------------------------------------------------

/// Write a raw request and read until the server closes the connection.
pub fn send_request(addr: &SocketAddr, req: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream.write_all(req.as_bytes()).unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

pub fn parse_status(resp: &str) -> u16 {
    resp.lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("0")
        .parse()
        .unwrap()
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

pub fn parse_response(resp: &str) -> HttpResponse {
    let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
    let headers = head
        .lines()
        .skip(1)
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    HttpResponse {
        status: parse_status(resp),
        headers,
        body: body.to_string(),
    }
}
