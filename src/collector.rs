//! Metrics collection across workers.
//!
//! Two disciplines implement the same contract: every worker gets a
//! [`MetricRecorder`] and calls [`MetricRecorder::ingest`] once per attempt,
//! and [`Collector::finalize`] is called once after all workers stopped.
//!
//! * Buffered-merge: each recorder keeps a private `Vec` and appends it to the
//!   shared list under the lock exactly once, when its worker finishes. One
//!   lock acquisition per worker, nothing visible before the worker ends,
//!   memory grows with run length.
//! * Streaming: each metric is pushed onto a bounded queue (capacity =
//!   worker count) drained by a single consumer that forwards it to the
//!   export sink right away. A full queue blocks the pushing worker, so a
//!   slow sink throttles the load itself.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::errors::ExportError;
use crate::exporter::MetricSink;
use crate::metrics::RequestMetric;
use crate::percentiles::LatencySummary;

/// Which collection discipline a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CollectorKind {
    #[default]
    Buffered,
    Streaming,
}

impl CollectorKind {
    pub fn label(&self) -> &'static str {
        match self {
            CollectorKind::Buffered => "buffered",
            CollectorKind::Streaming => "streaming",
        }
    }
}

/// The streaming consumer is gone, usually because the sink failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorClosed;

/// Result of [`Collector::finalize`].
pub enum Collected {
    /// Every metric, in merge order, not yet exported.
    Buffered(Vec<RequestMetric>),

    /// Metrics were already delivered to the sink in arrival order.
    Streamed {
        exported: usize,
        summary: LatencySummary,
    },
}

/// Shared list behind the buffered-merge discipline.
#[derive(Debug, Default)]
pub struct BufferedCollector {
    shared: Arc<Mutex<Vec<RequestMetric>>>,
}

fn lock(shared: &Mutex<Vec<RequestMetric>>) -> MutexGuard<'_, Vec<RequestMetric>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BufferedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> MetricRecorder {
        MetricRecorder::Buffered {
            local: Vec::new(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of metrics merged so far, i.e. visible outside the workers.
    pub fn visible_len(&self) -> usize {
        lock(&self.shared).len()
    }

    pub fn finalize(self) -> Vec<RequestMetric> {
        std::mem::take(&mut *lock(&self.shared))
    }
}

/// Bounded queue plus its single consumer.
pub struct StreamingCollector {
    sender: mpsc::Sender<RequestMetric>,
    consumer: JoinHandle<Result<(usize, LatencySummary), ExportError>>,
}

impl StreamingCollector {
    /// Starts the consumer on a dedicated blocking thread; the sink does
    /// synchronous I/O for every metric.
    pub fn spawn<S>(capacity: usize, mut sink: S) -> Self
    where
        S: MetricSink + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<RequestMetric>(capacity.max(1));

        let consumer = tokio::task::spawn_blocking(move || {
            let mut exported = 0usize;
            let mut summary = LatencySummary::new();
            while let Some(metric) = receiver.blocking_recv() {
                summary.record(&metric);
                if let Err(e) = sink.write_metric(&metric) {
                    // Dropping the receiver closes the queue so workers stop
                    // instead of blocking forever.
                    error!(error = %e, exported, "Streaming export failed");
                    return Err(e);
                }
                exported += 1;
            }
            sink.finish()?;
            debug!(exported, "Streaming consumer drained");
            Ok((exported, summary))
        });

        Self { sender, consumer }
    }

    pub fn recorder(&self) -> MetricRecorder {
        MetricRecorder::Streaming {
            sender: self.sender.clone(),
        }
    }

    /// Closes the queue and waits for the consumer to write everything.
    pub async fn finalize(self) -> Result<(usize, LatencySummary), ExportError> {
        drop(self.sender);
        self.consumer
            .await
            .map_err(|e| ExportError::ConsumerFailed(e.to_string()))?
    }
}

/// Per-worker handle onto the collector.
pub enum MetricRecorder {
    Buffered {
        local: Vec<RequestMetric>,
        shared: Arc<Mutex<Vec<RequestMetric>>>,
    },
    Streaming {
        sender: mpsc::Sender<RequestMetric>,
    },
}

impl MetricRecorder {
    /// Hands one metric over. In streaming mode this waits while the queue
    /// is full.
    pub async fn ingest(&mut self, metric: RequestMetric) -> Result<(), CollectorClosed> {
        match self {
            MetricRecorder::Buffered { local, .. } => {
                local.push(metric);
                Ok(())
            }
            MetricRecorder::Streaming { sender } => {
                sender.send(metric).await.map_err(|_| CollectorClosed)
            }
        }
    }

    /// Called once when the worker stops. Buffered recorders merge their
    /// private list into the shared one here.
    pub fn finish(self) {
        match self {
            MetricRecorder::Buffered { local, shared } => {
                let merged = local.len();
                lock(&shared).extend(local);
                debug!(merged, "Worker metrics merged");
            }
            MetricRecorder::Streaming { sender } => drop(sender),
        }
    }
}

/// A run's collector, in either discipline.
pub enum Collector {
    Buffered(BufferedCollector),
    Streaming(StreamingCollector),
}

impl Collector {
    pub fn buffered() -> Self {
        Collector::Buffered(BufferedCollector::new())
    }

    /// Must be called from within a tokio runtime.
    pub fn streaming<S>(worker_count: usize, sink: S) -> Self
    where
        S: MetricSink + 'static,
    {
        Collector::Streaming(StreamingCollector::spawn(worker_count, sink))
    }

    pub fn kind(&self) -> CollectorKind {
        match self {
            Collector::Buffered(_) => CollectorKind::Buffered,
            Collector::Streaming(_) => CollectorKind::Streaming,
        }
    }

    pub fn recorder(&self) -> MetricRecorder {
        match self {
            Collector::Buffered(c) => c.recorder(),
            Collector::Streaming(c) => c.recorder(),
        }
    }

    pub async fn finalize(self) -> Result<Collected, ExportError> {
        match self {
            Collector::Buffered(c) => Ok(Collected::Buffered(c.finalize())),
            Collector::Streaming(c) => {
                let (exported, summary) = c.finalize().await?;
                Ok(Collected::Streamed { exported, summary })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn metric(id: &str) -> RequestMetric {
        RequestMetric::response(id, Utc::now(), Duration::from_millis(1), 200, "200 OK".into())
    }

    #[derive(Clone, Default)]
    struct VecSink {
        seen: Arc<Mutex<Vec<String>>>,
        finished: Arc<Mutex<bool>>,
    }

    impl MetricSink for VecSink {
        fn write_metric(&mut self, metric: &RequestMetric) -> Result<(), ExportError> {
            self.seen.lock().unwrap().push(metric.id.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), ExportError> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    struct FailingSink;

    impl MetricSink for FailingSink {
        fn write_metric(&mut self, _metric: &RequestMetric) -> Result<(), ExportError> {
            Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )))
        }

        fn finish(&mut self) -> Result<(), ExportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn buffered_merges_once_per_worker() {
        let collector = BufferedCollector::new();
        let mut first = collector.recorder();
        let mut second = collector.recorder();

        first.ingest(metric("a")).await.unwrap();
        first.ingest(metric("b")).await.unwrap();
        second.ingest(metric("c")).await.unwrap();
        assert_eq!(collector.visible_len(), 0);

        first.finish();
        assert_eq!(collector.visible_len(), 2);
        second.finish();

        let ids: Vec<String> = collector.finalize().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streaming_forwards_in_arrival_order() {
        let sink = VecSink::default();
        let collector = Collector::streaming(1, sink.clone());
        let mut recorder = collector.recorder();

        for id in ["a", "b", "c", "d"] {
            recorder.ingest(metric(id)).await.unwrap();
        }
        recorder.finish();

        match collector.finalize().await.unwrap() {
            Collected::Streamed { exported, summary } => {
                assert_eq!(exported, 4);
                assert_eq!(summary.total_attempts(), 4);
            }
            Collected::Buffered(_) => panic!("expected streamed result"),
        }
        assert_eq!(*sink.seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert!(*sink.finished.lock().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streaming_metrics_visible_before_finalize() {
        let sink = VecSink::default();
        let collector = Collector::streaming(1, sink.clone());
        let mut recorder = collector.recorder();

        recorder.ingest(metric("a")).await.unwrap();
        recorder.ingest(metric("b")).await.unwrap();
        // Capacity 1: the second push only completes once "a" was popped.
        let mut waited = Duration::ZERO;
        while sink.seen.lock().unwrap().is_empty() && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waited += Duration::from_millis(5);
        }
        assert!(!sink.seen.lock().unwrap().is_empty());

        recorder.finish();
        collector.finalize().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streaming_sink_failure_closes_queue() {
        let collector = Collector::streaming(1, FailingSink);
        let mut recorder = collector.recorder();

        let mut closed = false;
        for _ in 0..100 {
            if recorder.ingest(metric("a")).await.is_err() {
                closed = true;
                break;
            }
        }
        assert!(closed, "queue should close after the sink fails");
        recorder.finish();

        let err = collector.finalize().await.err().unwrap();
        assert!(matches!(err, ExportError::Io(_)), "got {:?}", err);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(CollectorKind::Buffered.label(), "buffered");
        assert_eq!(CollectorKind::Streaming.label(), "streaming");
        assert_eq!(Collector::buffered().kind(), CollectorKind::Buffered);
    }
}
