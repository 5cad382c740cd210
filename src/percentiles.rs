//! Per-template latency summary using HDR Histogram.
//!
//! The summary is logged on stderr at the end of a run. In the streaming
//! discipline the consumer feeds it one metric at a time, so nothing beyond
//! the histograms is retained.

use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::metrics::RequestMetric;

/// Largest latency the histograms track: 1 hour, in microseconds.
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Percentile statistics for a set of latency measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    /// Number of successful responses
    pub count: u64,

    /// Number of attempts that ended with an error
    pub errors: u64,

    /// Mean/average value (microseconds)
    pub mean: f64,

    /// 50th percentile - median (microseconds)
    pub p50: u64,

    /// 90th percentile (microseconds)
    pub p90: u64,

    /// 99th percentile (microseconds)
    pub p99: u64,

    /// Maximum value (microseconds)
    pub max: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, errors={}, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p99={:.2}ms, max={:.2}ms",
            self.count,
            self.errors,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.max as f64 / 1000.0,
        )
    }
}

struct TemplateLatencies {
    histogram: Option<Histogram<u64>>,
    errors: u64,
}

impl TemplateLatencies {
    fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3).ok(),
            errors: 0,
        }
    }

    fn stats(&self) -> PercentileStats {
        match self.histogram.as_ref().filter(|h| !h.is_empty()) {
            Some(hist) => PercentileStats {
                count: hist.len(),
                errors: self.errors,
                mean: hist.mean(),
                p50: hist.value_at_quantile(0.50),
                p90: hist.value_at_quantile(0.90),
                p99: hist.value_at_quantile(0.99),
                max: hist.max(),
            },
            None => PercentileStats {
                count: 0,
                errors: self.errors,
                mean: 0.0,
                p50: 0,
                p90: 0,
                p99: 0,
                max: 0,
            },
        }
    }

    fn attempts(&self) -> u64 {
        self.histogram.as_ref().map_or(0, |h| h.len()) + self.errors
    }
}

/// Latency percentiles and error counts keyed by template id.
///
/// Only responses (status code present) contribute latency samples; failed
/// attempts are counted as errors.
#[derive(Default)]
pub struct LatencySummary {
    by_id: BTreeMap<String, TemplateLatencies>,
}

impl LatencySummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_metrics(metrics: &[RequestMetric]) -> Self {
        let mut summary = Self::new();
        for metric in metrics {
            summary.record(metric);
        }
        summary
    }

    pub fn record(&mut self, metric: &RequestMetric) {
        let entry = self
            .by_id
            .entry(metric.id.clone())
            .or_insert_with(TemplateLatencies::new);

        if metric.is_error() {
            entry.errors += 1;
            return;
        }

        let latency_us = u64::try_from(metric.duration.as_micros()).unwrap_or(u64::MAX);
        if let Some(hist) = entry.histogram.as_mut() {
            if let Err(e) = hist.record(latency_us.clamp(1, MAX_TRACKABLE_US)) {
                warn!(
                    latency_us = latency_us,
                    error = %e,
                    "Failed to record latency in histogram"
                );
            }
        }
    }

    pub fn stats(&self, id: &str) -> Option<PercentileStats> {
        self.by_id.get(id).map(TemplateLatencies::stats)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn total_attempts(&self) -> u64 {
        self.by_id
            .values()
            .map(TemplateLatencies::attempts)
            .sum()
    }

    /// Logs one line per template id.
    pub fn log(&self) {
        for (id, latencies) in &self.by_id {
            info!(id = %id, "{}", latencies.stats().format());
        }
    }
}
