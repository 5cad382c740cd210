use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collector::MetricRecorder;
use crate::executor::RequestExecutor;
use crate::template::RequestTemplate;

/// Configuration for a worker task.
pub struct WorkerConfig {
    pub task_id: usize,
    pub deadline: Instant,
}

/// What one worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub task_id: usize,
    pub passes: u64,
    pub requests: u64,
    pub errors: u64,
    /// The collector closed under this worker (streaming export failed).
    pub stopped_early: bool,
}

/// Runs full passes over `templates` until the deadline.
///
/// The deadline is only checked between passes: a pass that has started is
/// always completed, and an in-flight request is never cancelled. Every
/// attempt is handed to `recorder` exactly once.
pub async fn run_worker(
    config: WorkerConfig,
    executor: RequestExecutor,
    templates: Arc<[RequestTemplate]>,
    mut recorder: MetricRecorder,
) -> WorkerReport {
    debug!(
        task_id = config.task_id,
        templates = templates.len(),
        tracing = executor.is_tracing(),
        "Worker starting"
    );

    let mut report = WorkerReport {
        task_id: config.task_id,
        ..WorkerReport::default()
    };

    'passes: while Instant::now() < config.deadline {
        for template in templates.iter() {
            let metric = executor.execute(template).await;
            if metric.is_error() {
                report.errors += 1;
            }
            report.requests += 1;

            if recorder.ingest(metric).await.is_err() {
                warn!(
                    task_id = config.task_id,
                    "Metrics collector closed, stopping worker"
                );
                report.stopped_early = true;
                break 'passes;
            }
        }
        report.passes += 1;

        // A pass of pure build failures never awaits anything.
        tokio::task::yield_now().await;
    }

    recorder.finish();

    info!(
        task_id = config.task_id,
        passes = report.passes,
        requests = report.requests,
        errors = report.errors,
        "Worker stopping after duration limit"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::BufferedCollector;
    use std::collections::HashMap;
    use std::time::Duration;

    fn broken_templates() -> Arc<[RequestTemplate]> {
        vec![
            RequestTemplate {
                id: "first".to_string(),
                url: "http://localhost/".to_string(),
                method: "NOT VALID".to_string(),
                headers: HashMap::new(),
                body: None,
            },
            RequestTemplate {
                id: "second".to_string(),
                url: "::not a url::".to_string(),
                method: "GET".to_string(),
                headers: HashMap::new(),
                body: None,
            },
        ]
        .into()
    }

    #[tokio::test]
    async fn past_deadline_runs_no_pass() {
        let collector = BufferedCollector::new();
        let config = WorkerConfig {
            task_id: 0,
            deadline: Instant::now() - Duration::from_millis(1),
        };
        let executor = RequestExecutor::with_client(reqwest::Client::new());
        let report = run_worker(config, executor, broken_templates(), collector.recorder()).await;

        assert_eq!(report.passes, 0);
        assert_eq!(report.requests, 0);
        assert!(collector.finalize().is_empty());
    }

    #[tokio::test]
    async fn passes_keep_template_order() {
        let collector = BufferedCollector::new();
        let config = WorkerConfig {
            task_id: 3,
            deadline: Instant::now() + Duration::from_millis(20),
        };
        let executor = RequestExecutor::with_client(reqwest::Client::new());
        let report = run_worker(config, executor, broken_templates(), collector.recorder()).await;

        assert!(report.passes >= 1);
        assert_eq!(report.requests, report.passes * 2);
        assert_eq!(report.errors, report.requests);

        let metrics = collector.finalize();
        assert_eq!(metrics.len() as u64, report.requests);
        for pair in metrics.chunks(2) {
            assert_eq!(pair[0].id, "first");
            assert_eq!(pair[1].id, "second");
        }
    }
}
