//! Poll session configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorCode, Result, TrackerError};

/// Tunable polling parameters, loadable from configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Whether polling runs at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Base interval between cycles
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound for the backed-off interval
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    /// Growth factor applied on each transient failure (> 1)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Total width of the symmetric random jitter added to each delay
    #[serde(default = "default_jitter", with = "humantime_serde")]
    pub jitter: Duration,

    /// Absolute session timeout, measured from session start
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Error codes that only slow polling down
    #[serde(default = "default_backoff_on")]
    pub backoff_on: Vec<ErrorCode>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval: default_interval(),
            max_interval: default_max_interval(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
            timeout: default_timeout(),
            backoff_on: default_backoff_on(),
        }
    }
}

impl PollSettings {
    /// Set the base interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the maximum interval.
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Set the backoff factor.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the jitter width.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the session timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable polling.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the interval and backoff invariants.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(TrackerError::invalid_config("poll interval must be positive"));
        }
        if self.interval > self.max_interval {
            return Err(TrackerError::invalid_config(
                "poll interval must not exceed the maximum interval",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(TrackerError::invalid_config("backoff factor must be greater than 1"));
        }
        Ok(())
    }
}

/// Predicate over a poll result telling the engine to stop.
pub type StopPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Immutable configuration of one polling session.
pub struct PollConfig<T> {
    settings: PollSettings,
    stop_when: Option<StopPredicate<T>>,
}

impl<T> PollConfig<T> {
    /// Build a config from validated settings.
    pub fn new(settings: PollSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            stop_when: None,
        })
    }

    /// Stop polling once `predicate` holds for a result.
    pub fn stop_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    /// Get the settings.
    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Whether the result satisfies the stop predicate.
    pub fn should_stop(&self, result: &T) -> bool {
        self.stop_when.as_ref().map_or(false, |predicate| predicate(result))
    }

    /// Whether the error is one of the configured transient classifications.
    pub fn backs_off(&self, error: &TrackerError) -> bool {
        self.settings.backoff_on.contains(&error.code())
    }
}

impl<T> Clone for PollConfig<T> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            stop_when: self.stop_when.clone(),
        }
    }
}

impl<T> fmt::Debug for PollConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollConfig")
            .field("settings", &self.settings)
            .field("stop_when", &self.stop_when.is_some())
            .finish()
    }
}

// Default value functions
fn default_enabled() -> bool { true }
fn default_interval() -> Duration { Duration::from_millis(3000) }
fn default_max_interval() -> Duration { Duration::from_millis(15000) }
fn default_backoff_factor() -> f64 { 1.8 }
fn default_jitter() -> Duration { Duration::from_millis(250) }
fn default_timeout() -> Duration { Duration::from_secs(120) }
fn default_backoff_on() -> Vec<ErrorCode> { vec![ErrorCode::RateLimited, ErrorCode::ServiceUnavailable] }
