use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::SetupError;
use crate::phase_trace::{DialTapLayer, DnsTap, PhaseRecorder};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

/// Configuration for building a worker's HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub pool: PoolConfig,
}

/// Builds one worker's reqwest client.
///
/// Every worker gets its own client, so connection pools are never shared
/// across workers. When `recorder` is given, the DNS and dial taps it asks
/// for are installed on this client only.
pub fn build_client(
    config: &ClientConfig,
    recorder: Option<&Arc<PhaseRecorder>>,
) -> Result<reqwest::Client, SetupError> {
    let mut client_builder = config.pool.apply_to_builder(reqwest::Client::builder());

    if let Some(recorder) = recorder {
        let taps = recorder.taps();
        if taps.needs_resolver() {
            client_builder = client_builder.dns_resolver(Arc::new(DnsTap::new(Arc::clone(recorder))));
        }
        if taps.needs_connector_layer() {
            client_builder = client_builder.connector_layer(DialTapLayer::new(Arc::clone(recorder)));
        }
        debug!(taps = ?taps, "Connection phase taps installed");
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    }

    Ok(client_builder.build()?)
}
