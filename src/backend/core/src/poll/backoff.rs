//! Effective-interval bookkeeping for a poll session.

use rand::Rng;
use std::time::Duration;

use super::PollSettings;

/// Tracks the effective interval of one session.
///
/// The interval starts at the base, grows by the backoff factor on each
/// transient failure (capped at the maximum) and snaps back to the base on
/// success. A server-suggested delay replaces the next delay only; it never
/// feeds into later growth.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    hint: Option<Duration>,
}

impl Backoff {
    /// Start at the base interval of `settings`.
    pub fn new(settings: &PollSettings) -> Self {
        Self {
            base: settings.interval,
            max: settings.max_interval,
            factor: settings.backoff_factor,
            current: settings.interval,
            hint: None,
        }
    }

    /// Current effective interval.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Back to the base interval after a success.
    pub fn reset(&mut self) {
        self.current = self.base;
        self.hint = None;
    }

    /// Grow the interval after a transient failure.
    pub fn on_transient_failure(&mut self, retry_after: Option<Duration>) {
        let grown = (self.current.as_millis() as f64 * self.factor).ceil();
        let capped = grown.min(self.max.as_millis() as f64);
        self.current = Duration::from_millis(capped as u64);
        self.hint = retry_after;
    }

    /// Delay before the next cycle, consuming any one-shot server hint.
    pub fn next_delay(&mut self) -> Duration {
        self.hint.take().unwrap_or(self.current)
    }
}

/// Add symmetric jitter of total width `jitter` to `delay`, floored at zero.
pub fn jittered(delay: Duration, jitter: Duration) -> Duration {
    let width = jitter.as_millis() as i64;
    if width == 0 {
        return delay;
    }
    let offset = rand::rng().random_range(0..width) - width / 2;
    let millis = (delay.as_millis() as i64 + offset).max(0);
    Duration::from_millis(millis as u64)
}
