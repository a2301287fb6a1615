use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::gateway::{GatewayRequest, GatewayResponse};

/// A stage in the request pipeline.
///
/// `before` may short-circuit with a response. `after` runs for every stage
/// whose `before` ran, in reverse order, on whatever response was produced.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn before(&self, _req: &mut GatewayRequest) -> Option<GatewayResponse> {
        None
    }

    fn after(&self, _req: &GatewayRequest, _res: &mut GatewayResponse, _latency: Duration) {}
}

/// Ordered middleware stages, fixed at startup.
///
/// Stage order is construction order, so CORS placed ahead of authentication
/// always sees the request first.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn Middleware>) {
        self.stages.push(stage);
    }

    /// Run the request through every stage and then `terminal`.
    pub fn handle<F>(&self, req: &mut GatewayRequest, terminal: F) -> GatewayResponse
    where
        F: FnOnce(&GatewayRequest) -> GatewayResponse,
    {
        let start = Instant::now();
        let mut entered = 0;
        let mut short_circuit = None;
        for stage in &self.stages {
            entered += 1;
            if let Some(res) = stage.before(req) {
                short_circuit = Some(res);
                break;
            }
        }
        let mut res = match short_circuit {
            Some(res) => res,
            None => terminal(req),
        };
        let latency = start.elapsed();
        for stage in self.stages[..entered].iter().rev() {
            stage.after(req, &mut res, latency);
        }
        res
    }

    /// Run every stage's `after` on a response produced outside the chain,
    /// e.g. a request refused while it was still being read.
    pub fn finish(&self, req: &GatewayRequest, res: &mut GatewayResponse, latency: Duration) {
        for stage in self.stages.iter().rev() {
            stage.after(req, res, latency);
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
