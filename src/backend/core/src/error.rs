//! Error handling for jobwatch.
//!
//! This module provides:
//! - Machine-readable error codes with a stable category grouping
//! - The transient/terminal classification the poll engine relies on
//! - User-facing messages kept apart from internal detail
//! - Server-suggested retry delays carried alongside rate-limit errors
//! - Error logging with tracing integration and error metrics
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobwatch_core::error::{ErrorCode, TrackerError};
//!
//! let error = TrackerError::from_status(429, "").with_retry_after(Duration::from_secs(5));
//! assert_eq!(error.code(), ErrorCode::RateLimited);
//! assert!(error.is_retryable());
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for jobwatch operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// Poll configurations refer to these codes when deciding which failures
/// only slow the cadence down and which ones end a polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Job store errors (1000-1099)
    RateLimited,
    ServiceUnavailable,
    JobNotFound,
    RequestRejected,
    ExternalServiceError,
    NetworkError,
    RequestTimeout,

    // Polling errors (1100-1199)
    PollTimeout,
    Cancelled,

    // Creation errors (1200-1299)
    MissingJobId,
    ValidationError,

    // Serialization errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::RateLimited => 1000,
            Self::ServiceUnavailable => 1001,
            Self::JobNotFound => 1002,
            Self::RequestRejected => 1003,
            Self::ExternalServiceError => 1004,
            Self::NetworkError => 1005,
            Self::RequestTimeout => 1006,

            Self::PollTimeout => 1100,
            Self::Cancelled => 1101,

            Self::MissingJobId => 1200,
            Self::ValidationError => 1201,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Classify an HTTP status returned by the job store.
    pub const fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            503 => Self::ServiceUnavailable,
            404 => Self::JobNotFound,
            408 | 504 => Self::RequestTimeout,
            500..=599 => Self::ExternalServiceError,
            _ => Self::RequestRejected,
        }
    }

    /// Transient failures that should lengthen the polling interval instead
    /// of surfacing. This is the default backoff set of a poll config.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServiceUnavailable)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job_store",
            1100..=1199 => "polling",
            1200..=1299 => "creation",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected outcomes (cancellation, bad user input)
    Low,
    /// Operational issues (rate limits, timeouts)
    Medium,
    /// Failures the user has to act on
    High,
    /// Bugs and broken configuration
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Cancelled | ErrorCode::ValidationError | ErrorCode::JobNotFound => Self::Low,

            ErrorCode::RateLimited
            | ErrorCode::ServiceUnavailable
            | ErrorCode::RequestTimeout
            | ErrorCode::PollTimeout => Self::Medium,

            ErrorCode::RequestRejected
            | ErrorCode::ExternalServiceError
            | ErrorCode::NetworkError
            | ErrorCode::MissingJobId
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError => Self::High,

            ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for jobwatch.
#[derive(Error, Debug)]
pub struct TrackerError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Server-suggested delay before the next attempt
    retry_after: Option<Duration>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TrackerError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            retry_after: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// The in-flight call was cancelled by its owner.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request cancelled")
    }

    /// The polling session ran past its absolute timeout.
    pub fn poll_timeout(timeout: Duration) -> Self {
        Self::with_internal(
            ErrorCode::PollTimeout,
            "Polling timed out",
            format!("no terminal status within {:?}", timeout),
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// The job store answered with a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let code = ErrorCode::from_http_status(status);
        let user_msg = match code {
            ErrorCode::RateLimited => "Rate limited by the job store",
            ErrorCode::ServiceUnavailable => "The job store is temporarily unavailable",
            ErrorCode::JobNotFound => "Job not found",
            ErrorCode::RequestTimeout => "The job store timed out",
            ErrorCode::ExternalServiceError => "The job store returned an error",
            _ => "The job store rejected the request",
        };
        Self::with_internal(code, user_msg, format!("HTTP {}: {}", status, body.into()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a server-suggested retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Check if this error is retryable under the default classification.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Check if this error only reports a cancelled call.
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "job tracking error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    retry_after = ?self.retry_after,
                    "job tracking degraded"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "job tracking notice"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "jobwatch_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<reqwest::Error> for TrackerError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            let message = error.to_string();
            return Self::from_status(status.as_u16(), message).with_source(error);
        }

        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::RequestTimeout, "The job store timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to the job store")
        } else if error.is_decode() {
            (ErrorCode::DeserializationError, "The job store sent an unreadable response")
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::RequestTimeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::NetworkError, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for TrackerError {
    fn from(error: config::ConfigError) -> Self {
        let user_msg = match &error {
            config::ConfigError::NotFound(_) => "Required configuration not found",
            config::ConfigError::FileParse { .. } => "Configuration file could not be parsed",
            _ => "Invalid configuration",
        };

        Self::with_internal(ErrorCode::ConfigurationError, user_msg, error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(ErrorCode::from_http_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_http_status(503), ErrorCode::ServiceUnavailable);
        assert_eq!(ErrorCode::from_http_status(404), ErrorCode::JobNotFound);
        assert_eq!(ErrorCode::from_http_status(500), ErrorCode::ExternalServiceError);
        assert_eq!(ErrorCode::from_http_status(400), ErrorCode::RequestRejected);
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::ServiceUnavailable.is_retryable());
        assert!(!ErrorCode::ExternalServiceError.is_retryable());
        assert!(!ErrorCode::PollTimeout.is_retryable());
        assert!(!ErrorCode::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::RateLimited.category(), "job_store");
        assert_eq!(ErrorCode::PollTimeout.category(), "polling");
        assert_eq!(ErrorCode::MissingJobId.category(), "creation");
        assert_eq!(ErrorCode::InvalidConfiguration.category(), "configuration");
    }

    #[test]
    fn test_retry_after_is_carried() {
        let error = TrackerError::from_status(429, "slow down").with_retry_after(Duration::from_secs(5));
        assert_eq!(error.code(), ErrorCode::RateLimited);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_poll_timeout_message() {
        let error = TrackerError::poll_timeout(Duration::from_secs(120));
        assert_eq!(error.code(), ErrorCode::PollTimeout);
        assert_eq!(error.user_message(), "Polling timed out");
        assert_eq!(error.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_error_display() {
        let error = TrackerError::with_internal(ErrorCode::JobNotFound, "Job not found", "HTTP 404");
        assert_eq!(error.to_string(), "[JobNotFound] Job not found (internal: HTTP 404)");
        assert_eq!(error.internal_message(), Some("HTTP 404"));

        let error = TrackerError::cancelled();
        assert!(error.is_cancelled());
        assert_eq!(error.to_string(), "[Cancelled] Request cancelled");
    }

    #[test]
    fn test_from_serde_json_error() {
        let error: TrackerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(error.code(), ErrorCode::DeserializationError);
    }
}
