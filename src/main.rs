use bffgate::cli::{run_cli, Cli};
use bffgate::otel::{init_logging_with_config, LogConfig};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Held until exit so buffered log lines are flushed.
    let _log_guard = init_logging_with_config(&LogConfig::from_env())?;
    run_cli(cli)
}
