//! Optimistic progress estimation.
//!
//! While a job is being polled, a local ticker moves an optimistic value
//! forward between server updates. The visible value is the larger of the
//! optimistic value and the latest server-reported progress, and it never
//! goes down for the lifetime of one estimator. Only server-confirmed
//! progress can reach 100; the ticker stops at a ceiling below it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Result, TrackerError};

/// Ticker tuning for an estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSettings {
    /// Optimistic value on (re)start
    #[serde(default)]
    pub initial: f64,

    /// Increment per tick
    #[serde(default = "default_step")]
    pub step: f64,

    /// Time between ticks
    #[serde(default = "default_cadence", with = "humantime_serde")]
    pub cadence: Duration,

    /// Highest value the ticker may reach, strictly below 100
    #[serde(default = "default_ceiling")]
    pub ceiling: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            initial: 0.0,
            step: default_step(),
            cadence: default_cadence(),
            ceiling: default_ceiling(),
        }
    }
}

impl EstimatorSettings {
    /// Tuning used while a created job is processed.
    pub fn for_create() -> Self {
        Self {
            initial: 1.0,
            step: 2.0,
            cadence: Duration::from_millis(400),
            ceiling: 95.0,
        }
    }

    /// Tuning used while an import is processed.
    pub fn for_import() -> Self {
        Self {
            initial: 0.0,
            step: 3.0,
            cadence: Duration::from_millis(700),
            ceiling: 95.0,
        }
    }

    /// Check ticker invariants.
    pub fn validate(&self) -> Result<()> {
        if self.cadence.is_zero() {
            return Err(TrackerError::invalid_config("estimator cadence must be positive"));
        }
        if !(0.0..100.0).contains(&self.ceiling) {
            return Err(TrackerError::invalid_config(
                "estimator ceiling must be in [0, 100)",
            ));
        }
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(TrackerError::invalid_config("estimator step must be positive"));
        }
        if !(0.0..=self.ceiling).contains(&self.initial) {
            return Err(TrackerError::invalid_config(
                "estimator initial value must lie between 0 and the ceiling",
            ));
        }
        Ok(())
    }
}

fn default_step() -> f64 { 2.0 }
fn default_cadence() -> Duration { Duration::from_millis(400) }
fn default_ceiling() -> f64 { 95.0 }

#[derive(Debug, Default)]
struct EstimatorState {
    optimistic: f64,
    server: Option<f64>,
    published: f64,
}

impl EstimatorState {
    /// Recompute the fused value; returns it when it moved.
    fn refresh(&mut self) -> Option<f64> {
        let candidate = self
            .optimistic
            .max(self.server.unwrap_or(0.0))
            .clamp(0.0, 100.0);
        if candidate > self.published {
            self.published = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}

/// Fuses a local optimistic ticker with server-reported progress.
pub struct ProgressEstimator {
    settings: EstimatorSettings,
    state: Arc<Mutex<EstimatorState>>,
    value_tx: Arc<watch::Sender<f64>>,
    ticker: Mutex<Option<CancellationToken>>,
}

impl ProgressEstimator {
    /// Create a stopped estimator at zero.
    pub fn new(settings: EstimatorSettings) -> Self {
        let (value_tx, _) = watch::channel(0.0);
        Self {
            settings,
            state: Arc::new(Mutex::new(EstimatorState::default())),
            value_tx: Arc::new(value_tx),
            ticker: Mutex::new(None),
        }
    }

    /// Start (or restart) the ticker.
    ///
    /// Resets the optimistic component to its initial value; the visible
    /// value does not move backwards.
    pub fn start(&self) {
        self.stop();

        {
            let mut state = self.state.lock();
            state.optimistic = self.settings.initial;
            if let Some(value) = state.refresh() {
                self.value_tx.send_replace(value);
            }
        }

        let token = CancellationToken::new();
        tokio::spawn(tick(
            self.settings.clone(),
            self.state.clone(),
            self.value_tx.clone(),
            token.clone(),
        ));
        *self.ticker.lock() = Some(token);
    }

    /// Halt the ticker. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }

    /// Whether the ticker is running.
    pub fn is_active(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Record the latest server-reported progress. Non-finite values are ignored.
    pub fn observe(&self, server: f64) {
        if !server.is_finite() {
            return;
        }
        let mut state = self.state.lock();
        state.server = Some(server);
        if let Some(value) = state.refresh() {
            self.value_tx.send_replace(value);
        }
    }

    /// Current visible value in [0, 100].
    pub fn value(&self) -> f64 {
        self.state.lock().published
    }

    /// Subscribe to visible value changes.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.value_tx.subscribe()
    }
}

impl Drop for ProgressEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick(
    settings: EstimatorSettings,
    state: Arc<Mutex<EstimatorState>>,
    value_tx: Arc<watch::Sender<f64>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(settings.cadence) => {}
        }

        let mut guard = state.lock();
        guard.optimistic = (guard.optimistic + settings.step).min(settings.ceiling);
        if let Some(value) = guard.refresh() {
            trace!(progress = value, "estimator tick");
            value_tx.send_replace(value);
        }
        if guard.optimistic >= settings.ceiling {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> EstimatorSettings {
        EstimatorSettings {
            initial: 0.0,
            step: 10.0,
            cadence: Duration::from_millis(100),
            ceiling: 95.0,
        }
    }

    #[test]
    fn test_profiles_validate() {
        assert!(EstimatorSettings::for_create().validate().is_ok());
        assert!(EstimatorSettings::for_import().validate().is_ok());

        let at_hundred = EstimatorSettings { ceiling: 100.0, ..fast() };
        assert!(at_hundred.validate().is_err());
        let frozen = EstimatorSettings { cadence: Duration::ZERO, ..fast() };
        assert!(frozen.validate().is_err());
        let stalled = EstimatorSettings { step: 0.0, ..fast() };
        assert_eq!(
            stalled.validate().unwrap_err().code(),
            crate::error::ErrorCode::InvalidConfiguration
        );
        let backwards = EstimatorSettings { step: -1.0, ..fast() };
        assert!(backwards.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_advances_to_ceiling() {
        let estimator = ProgressEstimator::new(fast());
        estimator.start();
        assert_eq!(estimator.value(), 0.0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(estimator.value(), 30.0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(estimator.value(), 95.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_profile_starts_at_one() {
        let estimator = ProgressEstimator::new(EstimatorSettings::for_create());
        estimator.start();
        assert_eq!(estimator.value(), 1.0);
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(estimator.value(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_value_never_regresses() {
        let estimator = ProgressEstimator::new(fast());
        estimator.observe(30.0);
        estimator.observe(20.0);
        assert_eq!(estimator.value(), 30.0);

        estimator.observe(140.0);
        assert_eq!(estimator.value(), 100.0);
        estimator.observe(f64::NAN);
        assert_eq!(estimator.value(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_and_restart_keeps_published_value() {
        let estimator = ProgressEstimator::new(fast());
        estimator.start();
        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(estimator.value(), 50.0);

        estimator.stop();
        assert!(!estimator.is_active());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(estimator.value(), 50.0);

        estimator.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(estimator.value(), 50.0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(estimator.value(), 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_updates() {
        let estimator = ProgressEstimator::new(fast());
        let mut rx = estimator.subscribe();
        estimator.start();
        rx.wait_for(|value| *value >= 20.0).await.unwrap();
        assert!(estimator.value() >= 20.0);
    }
}
