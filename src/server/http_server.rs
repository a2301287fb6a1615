use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use super::service::GatewayService;
use crate::runtime_config::RuntimeConfig;

/// How often idle workers look at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Thread-pool HTTP server around `tiny_http`.
///
/// Every worker pulls requests from the shared listener and runs them through
/// the [`GatewayService`] to completion, upstream call included.
pub struct HttpServer {
    service: Arc<GatewayService>,
    workers: usize,
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    trigger: ShutdownTrigger,
    workers: Vec<JoinHandle<()>>,
}

/// Cloneable stop signal, usable from a signal-handling thread while another
/// thread waits in [`ServerHandle::join`].
#[derive(Clone)]
pub struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
    server: Arc<tiny_http::Server>,
}

impl ShutdownTrigger {
    /// Stop accepting requests. Requests already being handled complete.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested, draining workers");
        }
        self.server.unblock();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl ServerHandle {
    /// Bound address (with the real port when started on port 0).
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Wait until the listener accepts TCP connections.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if the server is not reachable within ~1s.
    pub fn wait_ready(&self) -> io::Result<()> {
        let target = connectable(self.addr);
        for _ in 0..200 {
            if TcpStream::connect_timeout(&target, Duration::from_millis(50)).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Trigger shutdown and wait for every worker to finish.
    pub fn stop(self) {
        self.trigger.trigger();
        if self.join().is_err() {
            error!("A worker thread panicked during shutdown");
        }
    }

    /// Block until all workers exit (after a trigger elsewhere).
    ///
    /// # Errors
    ///
    /// Returns the panic payload of the first worker that panicked.
    pub fn join(self) -> thread::Result<()> {
        let mut result = Ok(());
        for worker in self.workers {
            if let Err(e) = worker.join() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!(addr = %self.addr, "Server stopped");
        result
    }
}

impl HttpServer {
    /// Worker count from `BFFGATE_WORKERS`, see [`RuntimeConfig`].
    #[must_use]
    pub fn new(service: Arc<GatewayService>) -> Self {
        Self {
            service,
            workers: RuntimeConfig::from_env().workers,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Bind and spawn the workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let requested = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let server = Arc::new(tiny_http::Server::http(requested).map_err(io::Error::other)?);
        let addr = server.server_addr().to_ip().unwrap_or(requested);
        let trigger = ShutdownTrigger {
            flag: Arc::new(AtomicBool::new(false)),
            server: Arc::clone(&server),
        };

        let mut workers = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let server = Arc::clone(&server);
            let service = Arc::clone(&self.service);
            let flag = Arc::clone(&trigger.flag);
            let worker = thread::Builder::new()
                .name(format!("bffgate-worker-{index}"))
                .spawn(move || worker_loop(&server, &service, &flag))?;
            workers.push(worker);
        }
        info!(addr = %addr, workers = self.workers, "Gateway listening");
        Ok(ServerHandle {
            addr,
            trigger,
            workers,
        })
    }
}

fn worker_loop(server: &tiny_http::Server, service: &GatewayService, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Acquire) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(rq)) => {
                // A panicking request must not take the worker down with it.
                if catch_unwind(AssertUnwindSafe(|| service.serve(rq))).is_err() {
                    error!("Request handler panicked; connection dropped");
                }
            }
            Ok(None) => {}
            Err(e) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                debug!(error = %e, "Accept failed");
            }
        }
    }
}

/// A wildcard bind address is reached through loopback.
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectable_rewrites_wildcard() {
        let addr: SocketAddr = "0.0.0.0:8081".parse().unwrap();
        assert_eq!(connectable(addr), "127.0.0.1:8081".parse().unwrap());
        let addr: SocketAddr = "10.1.2.3:80".parse().unwrap();
        assert_eq!(connectable(addr), addr);
    }
}
