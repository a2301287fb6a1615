use std::io::Read;
use std::sync::Arc;

use http::Method;
use thiserror::Error;
use tracing::debug;

use crate::gateway::{GatewayRequest, GatewayResponse};
use crate::ids::RequestId;

/// Reasons an inbound request is refused before it is routed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("unsupported method `{0}`")]
    InvalidMethod(String),
    #[error("failed to read request body: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            RequestError::BodyTooLarge { .. } => 413,
            RequestError::InvalidMethod(_) => 400,
            RequestError::Io(_) => 400,
        }
    }

    #[must_use]
    pub fn to_response(&self) -> GatewayResponse {
        let message = match self {
            RequestError::BodyTooLarge { .. } => "Payload Too Large",
            _ => "Bad Request",
        };
        GatewayResponse::error(self.status(), message)
    }
}

/// Convert the head of a `tiny_http` request (method, target, headers) into a
/// [`GatewayRequest`] with an empty body.
///
/// The path is kept as received; normalization is the authentication gate's
/// job so that it classifies exactly what is forwarded.
pub fn read_head(rq: &tiny_http::Request) -> Result<GatewayRequest, RequestError> {
    let method_name = rq.method().as_str().to_string();
    let method = Method::from_bytes(method_name.as_bytes())
        .map_err(|_| RequestError::InvalidMethod(method_name.clone()))?;

    let mut req = GatewayRequest::new(method, rq.url());
    for header in rq.headers() {
        let name = header.field.as_str().as_str().to_ascii_lowercase();
        req.headers
            .push((Arc::from(name), header.value.as_str().to_string()));
    }
    req.request_id = RequestId::from_header_or_new(req.get_header("x-request-id"));
    req.remote_addr = rq.remote_addr().copied();
    Ok(req)
}

/// Read at most `max_body_bytes` of body into `req`.
pub fn read_body(
    rq: &mut tiny_http::Request,
    req: &mut GatewayRequest,
    max_body_bytes: usize,
) -> Result<(), RequestError> {
    if let Some(declared) = rq.body_length() {
        if declared > max_body_bytes {
            return Err(RequestError::BodyTooLarge {
                limit: max_body_bytes,
            });
        }
    }
    let mut body = Vec::new();
    rq.as_reader()
        .take(max_body_bytes as u64 + 1)
        .read_to_end(&mut body)?;
    if body.len() > max_body_bytes {
        return Err(RequestError::BodyTooLarge {
            limit: max_body_bytes,
        });
    }
    req.body = body;

    debug!(
        request_id = %req.request_id,
        method = %req.method,
        url = rq.url(),
        header_count = req.headers.len(),
        body_len = req.body.len(),
        "Parsed request"
    );
    Ok(())
}
