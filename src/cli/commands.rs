use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::GatewayConfig;
use crate::runtime_config::RuntimeConfig;
use crate::security::Access;
use crate::server::{GatewayService, HttpServer, ShutdownTrigger};

/// Command-line interface for the gateway
#[derive(Parser)]
#[command(name = "bffgate")]
#[command(version, about = "Authenticating edge gateway", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway
    Serve {
        /// Gateway configuration file (YAML)
        #[arg(short, long, env = "BFFGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Listen address, overrides `server.bind`
        #[arg(long)]
        bind: Option<String>,

        /// Worker threads, overrides `BFFGATE_WORKERS` and `server.workers`
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Validate a configuration and print the effective policy
    Check {
        /// Gateway configuration file (YAML)
        #[arg(short, long, env = "BFFGATE_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Load a configuration file (or defaults), apply environment and CLI
/// overrides, and validate.
pub fn load_config(path: Option<&Path>, bind: Option<&str>) -> Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(bind) = bind {
        config.server.bind = bind.to_string();
    }
    config.validate().context("invalid gateway configuration")?;
    Ok(config)
}

pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            bind,
            workers,
        } => {
            let config = load_config(config.as_deref(), bind.as_deref())?;
            serve(&config, workers)
        }
        Commands::Check { config } => {
            let config = load_config(config.as_deref(), None)?;
            print!("{}", policy_summary(&config));
            println!("configuration OK");
            Ok(())
        }
    }
}

fn serve(config: &GatewayConfig, workers: Option<usize>) -> Result<()> {
    let workers = workers
        .filter(|n| *n > 0)
        .or_else(RuntimeConfig::workers_from_env)
        .or(config.server.workers)
        .unwrap_or_else(|| RuntimeConfig::default().workers);

    let service = Arc::new(GatewayService::from_config(config)?);
    let handle = HttpServer::new(service)
        .with_workers(workers)
        .start(config.server.bind.as_str())
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    install_signal_handler(handle.shutdown_trigger())?;
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("a worker thread panicked"))?;
    info!("Gateway shut down cleanly");
    Ok(())
}

#[cfg(unix)]
fn install_signal_handler(trigger: ShutdownTrigger) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    std::thread::Builder::new()
        .name("bffgate-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Received termination signal");
                trigger.trigger();
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handler(_trigger: ShutdownTrigger) -> Result<()> {
    Ok(())
}

/// Human-readable description of what a configuration enforces.
#[must_use]
pub fn policy_summary(config: &GatewayConfig) -> String {
    PolicySummary(config).to_string()
}

struct PolicySummary<'a>(&'a GatewayConfig);

impl fmt::Display for PolicySummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.0;
        let cb = &config.upstream.circuit_breaker;
        writeln!(f, "bind:       {}", config.server.bind)?;
        writeln!(
            f,
            "upstream:   {} (timeout {}ms, opens after {} failures for {}s)",
            config.upstream.base_url,
            config.upstream.timeout_ms,
            cb.failure_threshold,
            cb.recovery_timeout_secs,
        )?;
        writeln!(f, "issuer:     {}", config.auth.issuer)?;
        writeln!(f, "audiences:  {}", config.auth.audiences.join(", "))?;
        writeln!(f, "jwks:       {}", config.jwks_url())?;
        writeln!(f, "algorithms: {}", config.auth.algorithms.join(", "))?;
        writeln!(
            f,
            "cors:       credentials={} origins=[{}]",
            config.cors.allow_credentials,
            config.cors.allowed_origins.join(", ")
        )?;
        writeln!(f, "routes:")?;
        for rule in &config.routes.0 {
            let methods = if rule.methods.is_empty() {
                "ANY".to_string()
            } else {
                rule.methods.join(",")
            };
            writeln!(
                f,
                "  {:<13} {:<8} {}",
                access_label(rule.access),
                methods,
                rule.pattern
            )?;
        }
        writeln!(f, "  {:<13} {:<8} everything else", "authenticated", "ANY")
    }
}

fn access_label(access: Access) -> &'static str {
    match access {
        Access::Public => "public",
        Access::Authenticated => "authenticated",
    }
}
