//! Error types and request failure categorization.
//!
//! Only [`SetupError`] and [`ExportError`] ever reach `main`. Failures of an
//! individual request are data: they are recorded on the request's metric as
//! a categorized message and the run carries on.

use std::fmt;
use thiserror::Error;

/// Fatal problems detected before any worker starts.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to read request templates: {0}")]
    ReadInput(#[from] std::io::Error),

    #[error("Failed to parse request templates: {0}")]
    ParseInput(#[from] serde_json::Error),

    #[error("Request template list is empty")]
    NoTemplates,

    #[error("Request template at index {index} is invalid: {message}")]
    InvalidTemplate { index: usize, message: String },

    #[error("Invalid duration '{value}': {message}")]
    InvalidDuration { value: String, message: String },

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Output format '{format}' cannot be used with the '{collector}' collector")]
    IncompatibleOutput { format: String, collector: String },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Fatal problems while serializing or writing collected metrics.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Writing CSV failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serializing JSON failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Writing output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics consumer stopped unexpectedly: {0}")]
    ConsumerFailed(String),
}

/// Categories of failures a single request attempt can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The template could not be turned into a request (bad method, URL, header)
    BuildError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize a reqwest error raised while dispatching a request.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            return ErrorCategory::BuildError;
        }
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }

        // Look at the whole chain: reqwest wraps the interesting cause.
        let error_msg = crate::utils::error_chain(error).to_lowercase();

        if error_msg.contains("certificate")
            || error_msg.contains("tls")
            || error_msg.contains("ssl")
        {
            ErrorCategory::TlsError
        } else if error_msg.contains("timed out") || error_msg.contains("timeout") {
            ErrorCategory::TimeoutError
        } else if error.is_connect()
            || error.is_request()
            || error.is_body()
            || error_msg.contains("dns")
            || error_msg.contains("resolve")
            || error_msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Short machine-friendly label, used as the prefix of recorded error text.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::BuildError => "build_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::BuildError => "Request Build Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// Formats the text stored in `RequestMetric::error`.
    pub fn describe(&self, detail: &str) -> String {
        format!("{}: {}", self.label(), detail)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_labels() {
        assert_eq!(ErrorCategory::BuildError.label(), "build_error");
        assert_eq!(ErrorCategory::NetworkError.label(), "network_error");
        assert_eq!(ErrorCategory::TimeoutError.label(), "timeout_error");
        assert_eq!(ErrorCategory::TlsError.label(), "tls_error");
        assert_eq!(ErrorCategory::OtherError.label(), "other_error");
    }

    #[test]
    fn test_describe_prefixes_label() {
        assert_eq!(
            ErrorCategory::BuildError.describe("invalid HTTP method"),
            "build_error: invalid HTTP method"
        );
    }

    #[test]
    fn test_display_uses_description() {
        assert_eq!(
            format!("{}", ErrorCategory::NetworkError),
            "Network/Connection Errors"
        );
    }

    #[test]
    fn test_setup_error_messages() {
        let err = SetupError::InvalidDuration {
            value: "10x".to_string(),
            message: "Unknown duration unit: 'x'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid duration '10x': Unknown duration unit: 'x'"
        );

        let err = SetupError::IncompatibleOutput {
            format: "json".to_string(),
            collector: "streaming".to_string(),
        };
        assert!(err.to_string().contains("json"));
        assert!(err.to_string().contains("streaming"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:1/unreachable")
            .send()
            .await
            .unwrap_err();
        assert_eq!(
            ErrorCategory::from_reqwest_error(&err),
            ErrorCategory::NetworkError
        );
    }
}
