use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use replay_loadtest::collector::{Collected, Collector, CollectorKind};
use replay_loadtest::config::{Cli, Config, OutputFormat};
use replay_loadtest::driver::LoadDriver;
use replay_loadtest::errors::ExportError;
use replay_loadtest::exporter::{to_csv, to_json, CsvStreamWriter};
use replay_loadtest::logging::init_logging;
use replay_loadtest::percentiles::LatencySummary;
use replay_loadtest::template::load_templates;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    // Setup: any failure here aborts before a single request is sent.
    let config = match Config::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let templates = match load_templates(io::stdin().lock()) {
        Ok(t) => t,
        Err(e) => {
            error!("Input error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.log_summary(templates.len());

    let driver = match LoadDriver::new(Arc::from(templates), &config.run_settings()) {
        Ok(d) => d,
        Err(e) => {
            error!("Setup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let export_settings = config.export_settings();
    let collector = match config.collector {
        CollectorKind::Buffered => Collector::buffered(),
        CollectorKind::Streaming => Collector::streaming(
            driver.worker_count(),
            CsvStreamWriter::new(io::stdout(), export_settings),
        ),
    };

    driver.run(&collector).await;

    let collected = match collector.finalize().await {
        Ok(c) => c,
        Err(e) => {
            error!("Export error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = match collected {
        Collected::Buffered(metrics) => {
            let summary = LatencySummary::from_metrics(&metrics);
            let encoded = match config.format {
                OutputFormat::Csv => to_csv(&metrics, &export_settings),
                OutputFormat::Json => to_json(&metrics, &export_settings),
            };
            if let Err(e) = encoded.and_then(|text| write_stdout(&text)) {
                // Nothing has reached stdout; the collected metrics are lost.
                error!(
                    discarded = metrics.len(),
                    format = config.format.label(),
                    "Export error: {}",
                    e
                );
                return ExitCode::FAILURE;
            }
            info!(exported = metrics.len(), "Metrics written");
            summary
        }
        Collected::Streamed { exported, summary } => {
            info!(exported, "Metrics streamed");
            summary
        }
    };

    summary.log();
    ExitCode::SUCCESS
}

fn write_stdout(text: &str) -> Result<(), ExportError> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
