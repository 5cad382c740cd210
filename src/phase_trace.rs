//! Connection lifecycle taps.
//!
//! reqwest exposes no per-request connection events, so the taps sit at the
//! two seams it does expose: a custom DNS resolver and a tower layer around
//! the connector. Both write into a [`PhaseRecorder`] owned by one worker's
//! client. A worker has at most one request in flight, so whatever the taps
//! record between [`PhaseRecorder::begin`] and [`PhaseRecorder::finish`]
//! belongs to that request. No events at all means a pooled connection was
//! reused.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::trace;

use crate::metrics::PhaseDurations;

/// Which phases are measured. Each tap can be enabled on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTaps {
    pub dns: bool,
    pub dial: bool,
    pub conn_acquire: bool,
}

impl PhaseTaps {
    pub const fn all() -> Self {
        Self {
            dns: true,
            dial: true,
            conn_acquire: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            dns: false,
            dial: false,
            conn_acquire: false,
        }
    }

    pub fn any(&self) -> bool {
        self.dns || self.dial || self.conn_acquire
    }

    /// Dial time is derived as connector time minus lookup time, so the
    /// resolver is needed for either phase.
    pub fn needs_resolver(&self) -> bool {
        self.dns || self.dial
    }

    pub fn needs_connector_layer(&self) -> bool {
        self.dial || self.conn_acquire
    }
}

#[derive(Debug, Default)]
struct PhaseEvents {
    dns: Option<Duration>,
    connect_started: Option<Instant>,
    connect_finished: Option<Instant>,
}

/// Collects tap events for the request currently in flight on one client.
#[derive(Debug, Default)]
pub struct PhaseRecorder {
    taps: PhaseTaps,
    events: Mutex<PhaseEvents>,
}

impl PhaseRecorder {
    pub fn new(taps: PhaseTaps) -> Self {
        Self {
            taps,
            events: Mutex::new(PhaseEvents::default()),
        }
    }

    pub fn taps(&self) -> PhaseTaps {
        self.taps
    }

    fn events(&self) -> MutexGuard<'_, PhaseEvents> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears anything left over from the previous request.
    pub fn begin(&self) {
        *self.events() = PhaseEvents::default();
    }

    fn record_dns(&self, elapsed: Duration) {
        self.events().dns = Some(elapsed);
    }

    fn record_connect_started(&self, at: Instant) {
        self.events().connect_started = Some(at);
    }

    fn record_connect_finished(&self, at: Instant) {
        self.events().connect_finished = Some(at);
    }

    /// Turns the recorded events into phase durations for a request
    /// dispatched at `dispatched_at`.
    pub fn finish(&self, dispatched_at: Instant) -> PhaseDurations {
        let events = std::mem::take(&mut *self.events());

        let dns = events.dns.unwrap_or(Duration::ZERO);
        let dial = match (events.connect_started, events.connect_finished) {
            (Some(started), Some(finished)) => finished
                .saturating_duration_since(started)
                .saturating_sub(dns),
            _ => Duration::ZERO,
        };
        let conn_acquire = events
            .connect_finished
            .map(|finished| finished.saturating_duration_since(dispatched_at))
            .unwrap_or(Duration::ZERO);

        PhaseDurations {
            dns: self.taps.dns.then_some(dns),
            dial: self.taps.dial.then_some(dial),
            conn_acquire: self.taps.conn_acquire.then_some(conn_acquire),
        }
    }
}

/// DNS tap: resolves through tokio and records how long the lookup took.
#[derive(Debug, Clone)]
pub struct DnsTap {
    recorder: Arc<PhaseRecorder>,
}

impl DnsTap {
    pub fn new(recorder: Arc<PhaseRecorder>) -> Self {
        Self { recorder }
    }
}

impl Resolve for DnsTap {
    fn resolve(&self, name: Name) -> Resolving {
        let recorder = Arc::clone(&self.recorder);
        Box::pin(async move {
            let started = Instant::now();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await?
                .collect();
            let elapsed = started.elapsed();
            recorder.record_dns(elapsed);
            trace!(host = name.as_str(), elapsed = ?elapsed, "DNS lookup finished");
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<Addrs, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Dial tap layer, installed with `ClientBuilder::connector_layer`.
///
/// The connector is only invoked when the pool has no idle connection, so the
/// wrapped service sees exactly the fresh connections.
#[derive(Debug, Clone)]
pub struct DialTapLayer {
    recorder: Arc<PhaseRecorder>,
}

impl DialTapLayer {
    pub fn new(recorder: Arc<PhaseRecorder>) -> Self {
        Self { recorder }
    }
}

impl<S> tower::Layer<S> for DialTapLayer {
    type Service = DialTap<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DialTap {
            inner,
            recorder: Arc::clone(&self.recorder),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialTap<S> {
    inner: S,
    recorder: Arc<PhaseRecorder>,
}

impl<S, Req> tower::Service<Req> for DialTap<S>
where
    S: tower::Service<Req>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = DialTapFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.recorder.record_connect_started(Instant::now());
        DialTapFuture {
            connecting: Box::pin(self.inner.call(req)),
            recorder: Arc::clone(&self.recorder),
        }
    }
}

/// Records the moment the wrapped connector hands back a usable connection.
pub struct DialTapFuture<F> {
    connecting: Pin<Box<F>>,
    recorder: Arc<PhaseRecorder>,
}

impl<F, T, E> Future for DialTapFuture<F>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(self.connecting.as_mut().poll(cx));
        if result.is_ok() {
            self.recorder.record_connect_finished(Instant::now());
        }
        Poll::Ready(result)
    }
}
