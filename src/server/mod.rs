//! HTTP front end: adapts `tiny_http` requests to the middleware chain and
//! runs the worker threads.

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle, ShutdownTrigger};
pub use request::{read_body, read_head, RequestError};
pub use response::into_http_response;
pub use service::{health_response, GatewayService};
