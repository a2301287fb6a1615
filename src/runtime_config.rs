//! # Runtime Configuration Module
//!
//! Process-level tuning read from the environment, separate from the gateway
//! policy in [`crate::config`].
//!
//! ## Environment Variables
//!
//! ### `BFFGATE_WORKERS`
//!
//! Number of request worker threads. Each worker blocks on one request at a
//! time (including the upstream call), so this bounds in-flight requests.
//!
//! Default: available parallelism × 4, at least 4.
//!
//! ```bash
//! export BFFGATE_WORKERS=64
//! bffgate serve --config config/gateway.yaml
//! ```

use std::env;

pub const ENV_WORKERS: &str = "BFFGATE_WORKERS";

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker thread count (never zero)
    pub workers: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_value(env::var(ENV_WORKERS).ok().as_deref())
    }

    /// Worker count only if `BFFGATE_WORKERS` is set to a valid value.
    #[must_use]
    pub fn workers_from_env() -> Option<usize> {
        parse_workers(env::var(ENV_WORKERS).ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        RuntimeConfig {
            workers: parse_workers(value).unwrap_or_else(default_workers),
        }
    }
}

fn parse_workers(value: Option<&str>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(4)
        .max(4)
}
