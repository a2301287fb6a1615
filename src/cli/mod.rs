//! # CLI Module
//!
//! Command-line entry points for the `bffgate` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Load the configuration, build the pipeline and serve until SIGINT/SIGTERM:
//!
//! ```bash
//! bffgate serve --config config/gateway.yaml
//! bffgate serve --config config/gateway.yaml --bind 127.0.0.1:9000 --workers 32
//! ```
//!
//! ### `check`
//!
//! Validate a configuration without binding or fetching anything and print the
//! effective CORS and route policy:
//!
//! ```bash
//! bffgate check --config config/gateway.yaml
//! ```
//!
//! Both commands accept `BFFGATE_CONFIG` instead of `--config`, and apply the
//! `BFFGATE_*` overrides described in [`crate::config`].

mod commands;


pub use commands::{load_config, policy_summary, run_cli, Cli, Commands};
