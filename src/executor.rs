//! Request execution.
//!
//! Turns a [`RequestTemplate`] into a dispatched call, times it and returns
//! exactly one [`RequestMetric`]. Nothing here ever fails upward: build and
//! transport failures are recorded on the metric and the caller carries on.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing::{debug, trace};

use crate::client::{build_client, ClientConfig};
use crate::errors::{ErrorCategory, SetupError};
use crate::metrics::RequestMetric;
use crate::phase_trace::{PhaseRecorder, PhaseTaps};
use crate::template::RequestTemplate;
use crate::utils::error_chain;

/// Executes templates on one worker's private client.
///
/// An executor must only have one request in flight at a time: the phase
/// recorder attributes every tap event to the current request.
pub struct RequestExecutor {
    client: reqwest::Client,
    recorder: Option<Arc<PhaseRecorder>>,
}

impl RequestExecutor {
    /// Builds an executor with its own client. `taps` selects which
    /// connection phases are measured; `PhaseTaps::none()` disables tracing.
    pub fn new(config: &ClientConfig, taps: PhaseTaps) -> Result<Self, SetupError> {
        let recorder = taps.any().then(|| Arc::new(PhaseRecorder::new(taps)));
        let client = build_client(config, recorder.as_ref())?;
        Ok(Self { client, recorder })
    }

    /// Wraps an existing client. Used when phase tracing is not needed.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            recorder: None,
        }
    }

    pub fn is_tracing(&self) -> bool {
        self.recorder.is_some()
    }

    pub async fn execute(&self, template: &RequestTemplate) -> RequestMetric {
        let request = match self.build_request(template) {
            Ok(request) => request,
            Err(message) => {
                debug!(id = %template.id, error = %message, "Request build failed");
                return RequestMetric::failure(
                    &template.id,
                    Utc::now(),
                    Duration::ZERO,
                    ErrorCategory::BuildError.describe(&message),
                );
            }
        };

        if let Some(recorder) = &self.recorder {
            recorder.begin();
        }

        let start_time = Utc::now();
        let dispatched_at = Instant::now();
        let result = self.client.execute(request).await;
        let duration = dispatched_at.elapsed();

        let phases = self
            .recorder
            .as_ref()
            .map(|recorder| recorder.finish(dispatched_at));

        match result {
            Ok(mut response) => {
                let status = response.status();
                let status_line = match status.canonical_reason() {
                    Some(reason) => format!("{} {}", status.as_u16(), reason),
                    None => status.as_u16().to_string(),
                };

                // Drain the body so the connection goes back to the pool.
                // Not part of the measured duration.
                while let Ok(Some(_chunk)) = response.chunk().await {}

                trace!(
                    id = %template.id,
                    status_code = status.as_u16(),
                    duration = ?duration,
                    "Request completed"
                );

                RequestMetric::response(
                    &template.id,
                    start_time,
                    duration,
                    status.as_u16(),
                    status_line,
                )
                .with_phases(phases)
            }
            Err(e) => {
                let category = ErrorCategory::from_reqwest_error(&e);
                debug!(
                    id = %template.id,
                    error = %e,
                    error_category = %category.label(),
                    "Request failed"
                );
                // reqwest can still reject a request before touching the
                // network; that is a build failure and has no duration.
                let duration = if category == ErrorCategory::BuildError {
                    Duration::ZERO
                } else {
                    duration
                };
                RequestMetric::failure(
                    &template.id,
                    start_time,
                    duration,
                    category.describe(&error_chain(&e)),
                )
            }
        }
    }

    fn build_request(&self, template: &RequestTemplate) -> Result<reqwest::Request, String> {
        let method = Method::from_bytes(template.method.as_bytes())
            .map_err(|_| format!("invalid HTTP method '{}'", template.method))?;
        let url = Url::parse(&template.url)
            .map_err(|e| format!("invalid URL '{}': {}", template.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "unsupported URL scheme '{}' in '{}'",
                url.scheme(),
                template.url
            ));
        }

        let mut headers = HeaderMap::with_capacity(template.headers.len());
        for (name, value) in &template.headers {
            let header_name = HeaderName::from_str(name)
                .map_err(|e| format!("invalid header name '{}': {}", name, e))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| format!("invalid value for header '{}': {}", name, e))?;
            headers.append(header_name, header_value);
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = &template.body {
            builder = builder.body(body.clone());
        }

        builder.build().map_err(|e| error_chain(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn template(method: &str, url: &str) -> RequestTemplate {
        RequestTemplate {
            id: "t".to_string(),
            url: url.to_string(),
            method: method.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    fn executor() -> RequestExecutor {
        RequestExecutor::with_client(reqwest::Client::new())
    }

    #[test]
    fn builds_request_from_template() {
        let mut t = template("PATCH", "http://localhost:8080/items/1");
        t.headers
            .insert("X-Trace".to_string(), "abc".to_string());
        t.body = Some("payload".to_string());

        let request = executor().build_request(&t).unwrap();
        assert_eq!(*request.method(), Method::PATCH);
        assert_eq!(request.url().as_str(), "http://localhost:8080/items/1");
        assert_eq!(
            request.headers().get("x-trace").unwrap().to_str().unwrap(),
            "abc"
        );
        assert!(request.body().is_some());
    }

    #[test]
    fn rejects_bad_method() {
        let err = executor()
            .build_request(&template("GE T", "http://localhost/"))
            .unwrap_err();
        assert!(err.contains("invalid HTTP method"), "error was: {}", err);
    }

    #[test]
    fn rejects_bad_url() {
        let err = executor()
            .build_request(&template("GET", "not a url"))
            .unwrap_err();
        assert!(err.contains("invalid URL"), "error was: {}", err);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = executor()
            .build_request(&template("GET", "ftp://example.com/x"))
            .unwrap_err();
        assert!(err.contains("unsupported URL scheme 'ftp'"), "error was: {}", err);
    }

    #[tokio::test]
    async fn unsupported_scheme_is_zero_duration_build_failure() {
        let traced = RequestExecutor::new(&ClientConfig::default(), PhaseTaps::all()).unwrap();
        let metric = traced
            .execute(&template("GET", "ftp://example.com/x"))
            .await;
        assert_eq!(metric.duration, Duration::ZERO);
        assert_eq!(metric.status_code, None);
        assert!(!metric.is_traced());
        assert!(metric
            .error
            .as_deref()
            .unwrap()
            .starts_with("build_error: unsupported URL scheme"));
    }

    #[test]
    fn rejects_bad_header() {
        let mut t = template("GET", "http://localhost/");
        t.headers
            .insert("Bad Header".to_string(), "value".to_string());
        let err = executor().build_request(&t).unwrap_err();
        assert!(err.contains("invalid header name"), "error was: {}", err);
    }

    #[tokio::test]
    async fn build_failure_has_zero_duration_and_no_status() {
        let metric = executor()
            .execute(&template("BAD METHOD", "http://localhost/"))
            .await;
        assert_eq!(metric.id, "t");
        assert_eq!(metric.duration, Duration::ZERO);
        assert_eq!(metric.status_code, None);
        assert!(metric
            .error
            .as_deref()
            .unwrap()
            .starts_with("build_error: "));
    }

    #[test]
    fn tracing_follows_taps() {
        let config = ClientConfig::default();
        assert!(!RequestExecutor::new(&config, PhaseTaps::none())
            .unwrap()
            .is_tracing());
        assert!(RequestExecutor::new(&config, PhaseTaps::all())
            .unwrap()
            .is_tracing());
    }
}
