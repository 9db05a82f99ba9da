//! Resilient periodic polling.
//!
//! A [`PollEngine`] runs one session at a time. Each session repeatedly
//! invokes an async operation, publishes its latest result or terminal
//! error through a watch channel, backs off on transient failures and stops
//! on a stop predicate, a terminal error, its timeout or an explicit
//! [`PollEngine::stop`].
//!
//! Every session carries a generation number. Publication is checked against
//! the engine's current generation under the channel lock, so a late result
//! from a torn-down session can never overwrite newer state.

use metrics::counter;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{jittered, Backoff};
use super::PollConfig;
use crate::error::{Result, TrackerError};

// ═══════════════════════════════════════════════════════════════════════════════
// Published State
// ═══════════════════════════════════════════════════════════════════════════════

/// Observable state of a poll session.
#[derive(Debug)]
pub struct PollState<T> {
    /// Most recent successful result
    pub data: Option<T>,
    /// Terminal error that ended the session
    pub error: Option<Arc<TrackerError>>,
    /// Whether the session is still polling
    pub running: bool,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            running: false,
        }
    }
}

impl<T: Clone> Clone for PollState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            running: self.running,
        }
    }
}

/// Writes into the shared state only while its session is current.
struct Publisher<T> {
    state: Arc<watch::Sender<PollState<T>>>,
    generation: Arc<AtomicU64>,
    session: u64,
}

impl<T> Publisher<T> {
    fn publish(&self, update: impl FnOnce(&mut PollState<T>)) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != self.session {
                return false;
            }
            update(state);
            true
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

struct ActiveSession {
    generation: u64,
    token: CancellationToken,
}

/// Periodic poller with backoff, jitter and a session timeout.
pub struct PollEngine<T> {
    name: String,
    state: Arc<watch::Sender<PollState<T>>>,
    generation: Arc<AtomicU64>,
    session: Mutex<Option<ActiveSession>>,
}

impl<T> PollEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an idle engine. `name` labels its log lines.
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(PollState::default());
        Self {
            name: name.into(),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> PollState<T> {
        self.state.borrow().clone()
    }

    /// Whether a session is currently polling.
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Start a new session, tearing down any previous one first.
    ///
    /// The operation receives a cancellation token per call; the token fires
    /// when the session is stopped or replaced. With polling disabled the
    /// engine stays idle and only the teardown happens.
    ///
    /// The returned receiver has already seen the reset state, so its first
    /// `changed()` reports the session's first publication.
    pub fn start<F, Fut>(&self, operation: F, config: PollConfig<T>) -> watch::Receiver<PollState<T>>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut session = self.session.lock();
        let generation = self.teardown_locked(&mut session);

        if !config.settings().enabled {
            debug!(poller = %self.name, "polling disabled, not starting");
            self.state.send_replace(PollState::default());
            return self.subscribe();
        }

        let token = CancellationToken::new();
        self.state.send_replace(PollState {
            data: None,
            error: None,
            running: true,
        });
        let rx = self.subscribe();

        let publisher = Publisher {
            state: self.state.clone(),
            generation: self.generation.clone(),
            session: generation,
        };

        info!(
            poller = %self.name,
            generation,
            interval_ms = config.settings().interval.as_millis() as u64,
            timeout_ms = config.settings().timeout.as_millis() as u64,
            "poll session started"
        );

        tokio::spawn(run_session(
            self.name.clone(),
            operation,
            config,
            token.clone(),
            publisher,
        ));

        *session = Some(ActiveSession { generation, token });
        rx
    }

    /// Stop the current session.
    ///
    /// Cancels the in-flight call and the pending cycle. Nothing from the
    /// stopped session is published after this returns. Idempotent.
    pub fn stop(&self) {
        let mut session = self.session.lock();
        self.teardown_locked(&mut session);
        self.state.send_if_modified(|state| {
            let was_running = state.running;
            state.running = false;
            was_running
        });
    }

    /// Cancel the active session and open a new generation.
    ///
    /// Must run under the session lock so that teardown and installing the
    /// next session cannot interleave. Returns the new generation.
    fn teardown_locked(&self, session: &mut Option<ActiveSession>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = session.take() {
            previous.token.cancel();
            debug!(poller = %self.name, generation = previous.generation, "poll session stopped");
        }
        generation
    }
}

impl<T> Drop for PollEngine<T> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.session.lock().take() {
            session.token.cancel();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session Loop
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_session<T, F, Fut>(
    name: String,
    operation: F,
    config: PollConfig<T>,
    token: CancellationToken,
    publisher: Publisher<T>,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let settings = config.settings().clone();
    let started = Instant::now();
    let mut backoff = Backoff::new(&settings);

    loop {
        let call = operation(token.child_token());
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            outcome = call => outcome,
        };

        if token.is_cancelled() {
            return;
        }

        match outcome {
            Ok(data) => {
                backoff.reset();
                let finished = config.should_stop(&data);
                publisher.publish(|state| {
                    state.data = Some(data);
                    if finished {
                        state.running = false;
                    }
                });
                counter!("jobwatch_poll_cycles_total", "outcome" => "success").increment(1);

                if finished {
                    info!(poller = %name, "stop condition reached");
                    return;
                }
            }
            Err(error) if error.is_cancelled() => {
                debug!(poller = %name, "poll call cancelled by the operation, ending session");
                publisher.publish(|state| state.running = false);
                return;
            }
            Err(error) if config.backs_off(&error) => {
                backoff.on_transient_failure(error.retry_after());
                counter!("jobwatch_poll_cycles_total", "outcome" => "backoff").increment(1);
                warn!(
                    poller = %name,
                    error_code = %error.code(),
                    interval_ms = backoff.current().as_millis() as u64,
                    retry_after_ms = error.retry_after().map(|d| d.as_millis() as u64),
                    "transient poll failure, backing off"
                );
            }
            Err(error) => {
                error.log();
                counter!("jobwatch_poll_cycles_total", "outcome" => "error").increment(1);
                publisher.publish(|state| {
                    state.error = Some(Arc::new(error));
                    state.running = false;
                });
                return;
            }
        }

        if started.elapsed() > settings.timeout {
            let error = TrackerError::poll_timeout(settings.timeout);
            error.log();
            counter!("jobwatch_poll_cycles_total", "outcome" => "timeout").increment(1);
            publisher.publish(|state| {
                state.error = Some(Arc::new(error));
                state.running = false;
            });
            return;
        }

        let delay = jittered(backoff.next_delay(), settings.jitter);
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollSettings;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn settings() -> PollSettings {
        PollSettings::default()
            .with_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(1000))
            .with_jitter(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_predicate() {
        let engine = PollEngine::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let config = PollConfig::new(settings()).unwrap().stop_when(|n| *n >= 3);
        let mut rx = engine.start(
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                async move { Ok(n) }
            },
            config,
        );

        rx.wait_for(|state| !state.running).await.unwrap();
        let state = engine.snapshot();
        assert_eq!(state.data, Some(3));
        assert!(state.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_ends_session() {
        let engine = PollEngine::<u32>::new("test");
        let mut rx = engine.start(
            |_| async { Err(TrackerError::from_status(404, "gone")) },
            PollConfig::new(settings()).unwrap(),
        );

        rx.wait_for(|state| !state.running).await.unwrap();
        let state = engine.snapshot();
        assert!(state.data.is_none());
        assert_eq!(
            state.error.as_ref().map(|e| e.code()),
            Some(crate::error::ErrorCode::JobNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_does_not_poll() {
        let engine = PollEngine::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        engine.start(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            },
            PollConfig::new(settings().enabled(false)).unwrap(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silences_session() {
        let engine = PollEngine::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        engine.start(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
            PollConfig::new(settings()).unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(250)).await;

        engine.stop();
        engine.stop();
        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert!(!engine.is_running());
        assert_eq!(engine.snapshot().data, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_is_silent() {
        let engine = PollEngine::<u32>::new("test");
        engine.start(
            |_| async { Err(TrackerError::cancelled()) },
            PollConfig::new(settings()).unwrap(),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        let state = engine.snapshot();
        assert!(state.error.is_none());
        assert!(state.data.is_none());
        assert!(!state.running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_result_is_never_missed_by_returned_receiver() {
        let engine = PollEngine::<u32>::new("test");
        for _ in 0..200 {
            let config = PollConfig::new(settings()).unwrap().stop_when(|_| true);
            let mut rx = engine.start(|_| async { Ok(1) }, config);
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .expect("first publication was marked as seen")
                .unwrap();
            rx.wait_for(|state| !state.running).await.unwrap();
            assert_eq!(engine.snapshot().data, Some(1));
        }
    }

    /// Counts a call as in flight until it is dropped.
    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_leave_one_session() {
        let engine = Arc::new(PollEngine::<u32>::new("test"));
        let live = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let live = live.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let live = live.clone();
                engine.start(
                    move |token: CancellationToken| {
                        let live = live.clone();
                        async move {
                            live.fetch_add(1, Ordering::SeqCst);
                            let _call = InFlight(live);
                            token.cancelled().await;
                            Err(TrackerError::cancelled())
                        }
                    },
                    PollConfig::new(settings()).unwrap(),
                );
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert!(engine.is_running());

        engine.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
