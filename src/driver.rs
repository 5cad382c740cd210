//! The load driver: a fixed pool of workers running until a deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use crate::client::ClientConfig;
use crate::collector::Collector;
use crate::errors::SetupError;
use crate::executor::RequestExecutor;
use crate::phase_trace::PhaseTaps;
use crate::template::RequestTemplate;
use crate::worker::{run_worker, WorkerConfig, WorkerReport};

/// Settings for one run of the driver.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub worker_count: usize,
    pub run_duration: Duration,
    pub taps: PhaseTaps,
    pub client: ClientConfig,
}

/// Totals over all workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl DriverReport {
    pub fn passes(&self) -> u64 {
        self.workers.iter().map(|w| w.passes).sum()
    }

    pub fn requests(&self) -> u64 {
        self.workers.iter().map(|w| w.requests).sum()
    }

    pub fn errors(&self) -> u64 {
        self.workers.iter().map(|w| w.errors).sum()
    }
}

/// A fixed pool of workers, ready to run.
///
/// Each worker gets its own client, built in [`LoadDriver::new`] so that a
/// client failure aborts before any load is generated.
pub struct LoadDriver {
    templates: Arc<[RequestTemplate]>,
    executors: Vec<RequestExecutor>,
    run_duration: Duration,
    tracing: bool,
}

impl LoadDriver {
    pub fn new(
        templates: Arc<[RequestTemplate]>,
        settings: &RunSettings,
    ) -> Result<Self, SetupError> {
        if settings.worker_count == 0 {
            return Err(SetupError::InvalidWorkerCount);
        }
        if templates.is_empty() {
            return Err(SetupError::NoTemplates);
        }

        let executors = (0..settings.worker_count)
            .map(|_| RequestExecutor::new(&settings.client, settings.taps))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            templates,
            executors,
            run_duration: settings.run_duration,
            tracing: settings.taps.any(),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.executors.len()
    }

    /// Runs every worker until the deadline and returns once all of them
    /// have stopped.
    ///
    /// Workers are not paced or coordinated; each runs as fast as its
    /// responses come back. The run can overshoot the duration by up to one
    /// pass of the slowest worker.
    pub async fn run(self, collector: &Collector) -> DriverReport {
        info!(
            workers = self.executors.len(),
            templates = self.templates.len(),
            duration = ?self.run_duration,
            collector = collector.kind().label(),
            tracing = self.tracing,
            "Starting load run"
        );

        let start_time = Instant::now();
        let deadline = start_time + self.run_duration;

        let mut handles = Vec::with_capacity(self.executors.len());
        for (task_id, executor) in self.executors.into_iter().enumerate() {
            let config = WorkerConfig { task_id, deadline };
            let recorder = collector.recorder();
            let templates = Arc::clone(&self.templates);
            handles.push(tokio::spawn(run_worker(
                config, executor, templates, recorder,
            )));
        }

        let mut report = DriverReport::default();
        for handle in handles {
            match handle.await {
                Ok(worker) => report.workers.push(worker),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }
        report.elapsed = start_time.elapsed();

        info!(
            passes = report.passes(),
            requests = report.requests(),
            errors = report.errors(),
            elapsed = ?report.elapsed,
            "Load run finished"
        );

        report
    }
}

/// Builds the worker pool and runs it in one step.
pub async fn run(
    templates: Arc<[RequestTemplate]>,
    settings: &RunSettings,
    collector: &Collector,
) -> Result<DriverReport, SetupError> {
    Ok(LoadDriver::new(templates, settings)?.run(collector).await)
}
