//! Structured logging setup.
//!
//! All gateway diagnostics go through `tracing`. This module installs the
//! subscriber: JSON or pretty output, an `EnvFilter`, a sampling layer for
//! high-volume info/debug events, and optional non-blocking output via
//! `tracing-appender`.
//!
//! Configuration comes from `BFFGATE_LOG_*` environment variables; `RUST_LOG`
//! takes precedence over `BFFGATE_LOG_LEVEL` when set.

use anyhow::{Context, Result};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::Level;
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Which events reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Everything the filter lets through
    All,
    /// WARN and ERROR only
    ErrorOnly,
    /// Every WARN/ERROR, a fraction of the rest
    Sampled,
}

impl SamplingMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Fraction (0.0-1.0) of info/debug events kept in `Sampled` mode
    pub sampling_rate: f64,
    /// Write through a background thread
    pub async_logging: bool,
    /// Extra comma-separated filter directives, e.g. `reqwest=warn`
    pub target_filter: Option<String>,
    /// Include file:line
    pub include_location: bool,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            log_level: lookup("BFFGATE_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: lookup("BFFGATE_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: lookup("BFFGATE_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: lookup("BFFGATE_LOG_SAMPLING_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sampling_rate),
            async_logging: lookup("BFFGATE_LOG_ASYNC")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.async_logging),
            target_filter: lookup("BFFGATE_LOG_TARGET_FILTER"),
            include_location: lookup("BFFGATE_LOG_INCLUDE_LOCATION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.include_location),
        }
    }

    /// Verbose, synchronous, human readable.
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: false,
            target_filter: None,
            include_location: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }
}

/// Drops a share of below-WARN events.
pub struct SamplingLayer {
    mode: SamplingMode,
    sampling_rate: f64,
    counter: AtomicU64,
}

impl SamplingLayer {
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        Self {
            mode,
            sampling_rate: sampling_rate.clamp(0.0, 1.0),
            counter: AtomicU64::new(0),
        }
    }

    /// Static part of the decision; the result may be cached per callsite.
    fn admits(&self, metadata: &Metadata<'_>) -> bool {
        // Spans are never sampled away, only events.
        if metadata.is_span() {
            return true;
        }
        let important = matches!(*metadata.level(), Level::WARN | Level::ERROR);
        match self.mode {
            SamplingMode::All => true,
            SamplingMode::ErrorOnly => important,
            SamplingMode::Sampled => important || self.sampling_rate > 0.0,
        }
    }

    /// Per-event part: counts below-WARN events in `Sampled` mode.
    fn should_sample(&self, metadata: &Metadata<'_>) -> bool {
        if !self.admits(metadata) {
            return false;
        }
        if self.mode != SamplingMode::Sampled
            || metadata.is_span()
            || matches!(*metadata.level(), Level::WARN | Level::ERROR)
        {
            return true;
        }
        let interval = (1.0 / self.sampling_rate).round().max(1.0) as u64;
        self.counter.fetch_add(1, Ordering::Relaxed) % interval == 0
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        if self.admits(metadata) {
            Interest::always()
        } else {
            Interest::never()
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.admits(metadata)
    }

    // Runs for every event regardless of the cached callsite interest.
    fn event_enabled(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.should_sample(event.metadata())
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Returns the filter and any directives that failed to parse.
fn build_filter(config: &LogConfig) -> (EnvFilter, Vec<String>) {
    let level = parse_level(&config.log_level);
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let mut rejected = Vec::new();

    if let Some(target_filter) = &config.target_filter {
        for directive in target_filter.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(_) => rejected.push(directive.to_string()),
            }
        }
    }
    (filter, rejected)
}

/// Install the global subscriber.
///
/// With `async_logging` the returned guard owns the writer thread; keep it
/// alive until exit or buffered lines are lost.
///
/// ```no_run
/// use bffgate::otel::{init_logging_with_config, LogConfig};
///
/// let _guard = init_logging_with_config(&LogConfig::from_env())
///     .expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (filter, rejected) = build_filter(config);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate));

    let (writer, guard) = if config.async_logging {
        let (nb, guard) = tracing_appender::non_blocking(std::io::stdout());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(nb), Some(guard))
    } else {
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout),
            None,
        )
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    for directive in rejected {
        tracing::warn!(directive = %directive, "ignoring invalid log filter directive");
    }
    Ok(guard)
}
