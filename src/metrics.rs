//! The per-attempt outcome record.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Connection lifecycle sub-intervals of one request.
///
/// `None` means the tap for that phase is disabled. A phase the request did
/// not go through (a pooled connection was reused, or the host was an IP
/// literal so no lookup happened) is `Some(Duration::ZERO)`.
///
/// `conn_acquire` only covers fresh connections. Checking an idle connection
/// out of the pool is not observable through reqwest, so a reused connection
/// reports zero here even though the checkout itself took a little time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    pub dns: Option<Duration>,
    pub dial: Option<Duration>,
    pub conn_acquire: Option<Duration>,
}

/// Outcome of one executed attempt of a template.
///
/// Exactly one of `error` and `status_code` is set. Phase fields are `Some`
/// only when the executor traces connection phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetric {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub status_line: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub dns_duration: Option<Duration>,
    pub dial_duration: Option<Duration>,
    pub conn_acquire_duration: Option<Duration>,
}

impl RequestMetric {
    /// A completed call that produced a response status.
    pub fn response(
        id: &str,
        start_time: DateTime<Utc>,
        duration: Duration,
        status_code: u16,
        status_line: String,
    ) -> Self {
        Self {
            id: id.to_string(),
            start_time,
            duration,
            status_line: Some(status_line),
            status_code: Some(status_code),
            error: None,
            dns_duration: None,
            dial_duration: None,
            conn_acquire_duration: None,
        }
    }

    /// A failed attempt. `duration` is zero for build failures and the
    /// elapsed time for transport failures.
    pub fn failure(id: &str, start_time: DateTime<Utc>, duration: Duration, error: String) -> Self {
        Self {
            id: id.to_string(),
            start_time,
            duration,
            status_line: None,
            status_code: None,
            error: Some(error),
            dns_duration: None,
            dial_duration: None,
            conn_acquire_duration: None,
        }
    }

    pub fn with_phases(mut self, phases: Option<PhaseDurations>) -> Self {
        if let Some(phases) = phases {
            self.dns_duration = phases.dns;
            self.dial_duration = phases.dial;
            self.conn_acquire_duration = phases.conn_acquire;
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_traced(&self) -> bool {
        self.dns_duration.is_some()
            || self.dial_duration.is_some()
            || self.conn_acquire_duration.is_some()
    }
}
