use std::io::Cursor;

use tiny_http::{Header, Response};
use tracing::debug;

use crate::gateway::GatewayResponse;

/// Framing headers `tiny_http` computes itself.
const SERVER_MANAGED: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Convert a [`GatewayResponse`] into a `tiny_http` response.
#[must_use]
pub fn into_http_response(res: GatewayResponse) -> Response<Cursor<Vec<u8>>> {
    let GatewayResponse {
        status,
        headers,
        body,
    } = res;
    let mut out = Response::from_data(body).with_status_code(status);
    for (name, value) in &headers {
        if SERVER_MANAGED.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => debug!(header = %name, "Dropping response header with invalid bytes"),
        }
    }
    out
}
