use clap::{Parser, ValueEnum};
use tokio::time::Duration;
use tracing::info;

use crate::client::{ClientConfig, PoolConfig};
use crate::collector::CollectorKind;
use crate::driver::RunSettings;
use crate::errors::SetupError;
use crate::exporter::{DurationUnit, ExportSettings};
use crate::phase_trace::PhaseTaps;
use crate::utils::parse_duration_string;

/// Output encoding on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

/// Log line encoding on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command line options. Every option can also come from a `LOADTEST_*`
/// environment variable.
#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Replays a JSON list of HTTP request templates (read from stdin) with concurrent workers for a fixed duration and writes per-request metrics to stdout."
)]
pub struct Cli {
    /// Number of concurrent workers
    #[arg(short = 't', long = "threads", env = "LOADTEST_THREADS", default_value_t = 1)]
    pub threads: usize,

    /// How long to generate load (e.g. 500ms, 10s, 1m, 2h, 1m30s)
    #[arg(short = 'd', long = "duration", env = "LOADTEST_DURATION", default_value = "10s")]
    pub duration: String,

    /// Output format
    #[arg(long = "format", env = "LOADTEST_FORMAT", value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Metrics collection discipline
    #[arg(long = "collector", env = "LOADTEST_COLLECTOR", value_enum, default_value_t = CollectorKind::Buffered)]
    pub collector: CollectorKind,

    /// Measure DNS, dial and connection acquisition time per request
    #[arg(long = "trace", env = "LOADTEST_TRACE")]
    pub trace: bool,

    /// Representation of every duration in the output
    #[arg(long = "duration-unit", env = "LOADTEST_DURATION_UNIT", value_enum, default_value_t = DurationUnit::Millis)]
    pub duration_unit: DurationUnit,

    /// Skip TLS certificate verification
    #[arg(long = "skip-tls-verify", env = "LOADTEST_SKIP_TLS_VERIFY")]
    pub skip_tls_verify: bool,

    /// Maximum idle connections kept per host in each worker's pool
    #[arg(long = "max-idle-per-host", env = "LOADTEST_MAX_IDLE_PER_HOST", default_value_t = 32)]
    pub max_idle_per_host: usize,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long = "log-format", env = "LOADTEST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub worker_count: usize,
    pub run_duration: Duration,
    pub format: OutputFormat,
    pub collector: CollectorKind,
    pub trace: bool,
    pub duration_unit: DurationUnit,
    pub skip_tls_verify: bool,
    pub pool: PoolConfig,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, SetupError> {
        if cli.threads == 0 {
            return Err(SetupError::InvalidWorkerCount);
        }

        let run_duration =
            parse_duration_string(&cli.duration).map_err(|message| SetupError::InvalidDuration {
                value: cli.duration.clone(),
                message,
            })?;

        if cli.format == OutputFormat::Json && cli.collector == CollectorKind::Streaming {
            return Err(SetupError::IncompatibleOutput {
                format: cli.format.label().to_string(),
                collector: cli.collector.label().to_string(),
            });
        }

        Ok(Config {
            worker_count: cli.threads,
            run_duration,
            format: cli.format,
            collector: cli.collector,
            trace: cli.trace,
            duration_unit: cli.duration_unit,
            skip_tls_verify: cli.skip_tls_verify,
            pool: PoolConfig {
                max_idle_per_host: cli.max_idle_per_host,
                ..PoolConfig::default()
            },
        })
    }

    pub fn taps(&self) -> PhaseTaps {
        if self.trace {
            PhaseTaps::all()
        } else {
            PhaseTaps::none()
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            worker_count: self.worker_count,
            run_duration: self.run_duration,
            taps: self.taps(),
            client: ClientConfig {
                skip_tls_verify: self.skip_tls_verify,
                pool: self.pool.clone(),
            },
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            unit: self.duration_unit,
            include_phases: self.trace,
        }
    }

    /// Logs the configuration summary.
    pub fn log_summary(&self, template_count: usize) {
        info!(
            templates = template_count,
            workers = self.worker_count,
            duration = ?self.run_duration,
            format = self.format.label(),
            collector = self.collector.label(),
            trace = self.trace,
            duration_unit = ?self.duration_unit,
            skip_tls_verify = self.skip_tls_verify,
            max_idle_per_host = self.pool.max_idle_per_host,
            "Load test configuration"
        );
    }
}
