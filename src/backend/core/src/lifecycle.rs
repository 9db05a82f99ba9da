//! Job lifecycle controller.
//!
//! Drives one job submission at a time through
//! `idle → creating → polling → done → idle`, with `error` reachable from
//! `creating` and `polling`. The controller composes the job store, a
//! [`PollEngine`] and a [`ProgressEstimator`] and exposes a single
//! [`LifecycleSnapshot`] through a watch channel.
//!
//! Every submission gets an epoch. Background work (the create call, the
//! session watcher and the auto-reset timer) carries the epoch it was started
//! for and is ignored once the lifecycle has moved on.
//!
//! ```text
//!            start                 id                  finished
//!   idle ──────────▶ creating ──────────▶ polling ──────────────▶ done
//!    ▲                   │                   │                      │
//!    │ cancel            │ failure           │ terminal error       │ auto-reset
//!    │                   ▼                   ▼                      │
//!    └─────────────── error ◀────────────────┘                      │
//!    ▲                   │ retry ──▶ creating                       │
//!    └──────────────────────────────────────────────────────────────┘
//! ```

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JobProfile;
use crate::error::{ErrorCode, Result, TrackerError};
use crate::jobs::{JobId, JobKind, JobRecord, JobStatus, JobStore, NewJob};
use crate::notify::{NoticeKind, Notifier, TracingNotifier};
use crate::poll::{PollConfig, PollEngine, PollState};
use crate::progress::ProgressEstimator;

// ═══════════════════════════════════════════════════════════════════════════════
// Observable State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Creating,
    Polling,
    Done,
    Error,
}

impl Phase {
    /// Whether a submission is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Creating | Self::Polling)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Creating => write!(f, "creating"),
            Self::Polling => write!(f, "polling"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What the lifecycle currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleSnapshot {
    pub kind: JobKind,
    pub phase: Phase,
    pub job_id: Option<JobId>,
    /// User-facing message of the error that ended the submission
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    /// Displayed progress, never decreasing within a submission
    pub progress: f64,
    /// Last status tag reported by the store
    pub status: Option<JobStatus>,
}

impl LifecycleSnapshot {
    fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            phase: Phase::Idle,
            job_id: None,
            error: None,
            error_code: None,
            progress: 0.0,
            status: None,
        }
    }
}

/// Outcome of a start or retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new submission began
    Started,
    /// The request was dropped; a submission is already in flight or
    /// there is nothing to retry
    Ignored,
}

/// Invoked once per completed job.
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════════════════════

struct Inner {
    snapshot: LifecycleSnapshot,
    epoch: u64,
    last_name: Option<String>,
    notified_for: Option<JobId>,
    estimator: Option<Arc<ProgressEstimator>>,
    driver: Option<CancellationToken>,
    reset_timer: Option<CancellationToken>,
}

/// Side effects collected under the lock and run after releasing it.
#[derive(Default)]
struct Effects {
    completed: Option<JobId>,
}

/// State machine for one kind of job submission.
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    profile: JobProfile,
    poll_config: PollConfig<JobRecord>,
    notifier: Arc<dyn Notifier>,
    on_done: Option<CompletionCallback>,
    engine: PollEngine<JobRecord>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<LifecycleSnapshot>,
}

impl JobLifecycle {
    /// Create an idle lifecycle for `profile`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the profile breaks a poll or
    /// estimator invariant.
    pub fn new(store: Arc<dyn JobStore>, profile: JobProfile) -> Result<Self> {
        profile.validate()?;
        let poll_config = PollConfig::new(profile.poll.clone())?.stop_when(JobRecord::is_finished);
        let snapshot = LifecycleSnapshot::idle(profile.kind);
        let (state_tx, _) = watch::channel(snapshot.clone());

        Ok(Self {
            store,
            engine: PollEngine::new(format!("{}-status", profile.kind)),
            profile,
            poll_config,
            notifier: Arc::new(TracingNotifier),
            on_done: None,
            inner: Mutex::new(Inner {
                snapshot,
                epoch: 0,
                last_name: None,
                notified_for: None,
                estimator: None,
                driver: None,
                reset_timer: None,
            }),
            state_tx,
        })
    }

    /// Send notices to `notifier` instead of the log.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Call `callback` once for every completed job.
    pub fn on_done<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_done = Some(Arc::new(callback));
        self
    }

    /// The kind of job this lifecycle drives.
    pub fn kind(&self) -> JobKind {
        self.profile.kind
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.state_tx.subscribe()
    }

    /// Submit a new job named `name`.
    ///
    /// Ignored while a submission is creating or polling. Starting from
    /// `done` cancels the pending auto-reset. An invalid name moves the
    /// lifecycle to `error` without contacting the store.
    pub fn start(self: &Arc<Self>, name: &str) -> Submission {
        let mut inner = self.inner.lock();
        if inner.snapshot.phase.is_busy() {
            debug!(kind = %self.profile.kind, phase = %inner.snapshot.phase, "submission already in flight, ignoring start");
            return Submission::Ignored;
        }
        self.submit_locked(&mut inner, name.to_string());
        Submission::Started
    }

    /// Submit a fresh job with the last name after an error.
    pub fn retry(self: &Arc<Self>) -> Submission {
        let mut inner = self.inner.lock();
        if inner.snapshot.phase != Phase::Error {
            debug!(kind = %self.profile.kind, phase = %inner.snapshot.phase, "nothing to retry");
            return Submission::Ignored;
        }
        match inner.last_name.clone() {
            Some(name) => {
                info!(kind = %self.profile.kind, "retrying submission");
                self.submit_locked(&mut inner, name);
                Submission::Started
            }
            None => Submission::Ignored,
        }
    }

    /// Abandon the current submission and return to `idle`.
    ///
    /// Stops the estimator, the poll session and any pending auto-reset. A
    /// create call still in flight is discarded when it returns. The store
    /// is not contacted.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.snapshot.phase == Phase::Idle {
            return;
        }
        info!(kind = %self.profile.kind, phase = %inner.snapshot.phase, job_id = ?inner.snapshot.job_id, "submission cancelled");
        self.teardown_locked(&mut inner);
        inner.epoch += 1;
        inner.notified_for = None;
        inner.snapshot = LifecycleSnapshot::idle(self.profile.kind);
        self.publish_locked(&inner);
    }

    /// Stop all background work, leaving the snapshot as is.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        self.teardown_locked(&mut inner);
        inner.epoch += 1;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    fn submit_locked(self: &Arc<Self>, inner: &mut Inner, name: String) {
        self.teardown_locked(inner);
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.last_name = Some(name.clone());

        let job = match NewJob::queued(&name) {
            Ok(job) => job,
            Err(error) => {
                inner.snapshot = LifecycleSnapshot::idle(self.profile.kind);
                self.enter_error_locked(inner, &error);
                return;
            }
        };

        inner.snapshot = LifecycleSnapshot {
            phase: Phase::Creating,
            ..LifecycleSnapshot::idle(self.profile.kind)
        };
        self.publish_locked(inner);
        info!(kind = %self.profile.kind, name = %job.name, epoch, "submitting job");

        let token = CancellationToken::new();
        inner.driver = Some(token.clone());
        tokio::spawn(create_job(
            Arc::downgrade(self),
            self.store.clone(),
            epoch,
            job,
            token,
        ));
    }

    fn on_created(self: &Arc<Self>, epoch: u64, created: Result<JobRecord>) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.snapshot.phase != Phase::Creating {
            debug!(kind = %self.profile.kind, epoch, "discarding stale create response");
            return;
        }

        let id = match created.and_then(|record| record.require_id(self.profile.kind)) {
            Ok(id) => id,
            Err(error) => {
                self.teardown_locked(&mut inner);
                self.enter_error_locked(&mut inner, &error);
                return;
            }
        };

        let estimator = Arc::new(ProgressEstimator::new(self.profile.estimator.clone()));
        estimator.start();
        inner.estimator = Some(estimator.clone());
        inner.snapshot.phase = Phase::Polling;
        inner.snapshot.job_id = Some(id.clone());
        inner.snapshot.progress = inner.snapshot.progress.max(estimator.value());
        self.publish_locked(&inner);
        info!(kind = %self.profile.kind, job_id = %id, "job created, polling status");

        let store = self.store.clone();
        let poll_rx = self.engine.start(
            move |cancel| {
                let store = store.clone();
                let id = id.clone();
                async move { store.fetch(&id, &cancel).await }
            },
            self.poll_config.clone(),
        );

        let token = inner
            .driver
            .get_or_insert_with(CancellationToken::new)
            .clone();
        tokio::spawn(watch_session(
            Arc::downgrade(self),
            epoch,
            poll_rx,
            estimator.subscribe(),
            token,
        ));
    }

    /// Fold a poll state or estimator change into the snapshot.
    ///
    /// Returns `false` once the session is over for this epoch.
    fn on_poll_update(self: &Arc<Self>, epoch: u64, poll: &PollState<JobRecord>) -> bool {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.snapshot.phase != Phase::Polling {
                return false;
            }

            let estimator = inner.estimator.clone();
            let record = poll.data.as_ref();
            let raw = record.and_then(|r| r.progress).unwrap_or(0.0);
            if let (Some(estimator), Some(progress)) = (&estimator, record.and_then(|r| r.progress)) {
                estimator.observe(progress);
            }
            if let Some(status) = record.and_then(|r| r.status) {
                inner.snapshot.status = Some(status);
            }
            let estimated = estimator.as_ref().map_or(0.0, |e| e.value());
            inner.snapshot.progress = inner
                .snapshot
                .progress
                .max(estimated)
                .max(raw)
                .clamp(0.0, 100.0);

            if let Some(error) = &poll.error {
                self.teardown_locked(&mut inner);
                self.enter_error_locked(&mut inner, error);
                return false;
            }

            if record.map_or(false, JobRecord::is_finished) {
                if let Some(id) = inner.snapshot.job_id.clone() {
                    if inner.notified_for.as_ref() != Some(&id) {
                        self.enter_done_locked(&mut inner, epoch, &id);
                        effects.completed = Some(id);
                    }
                }
            } else {
                self.publish_locked(&inner);
            }
        }

        if let Some(id) = effects.completed {
            self.notifier.notify(success_notice(self.profile.kind), NoticeKind::Success);
            if let Some(callback) = &self.on_done {
                callback();
            }
            debug!(kind = %self.profile.kind, job_id = %id, "completion effects delivered");
            return false;
        }
        true
    }

    fn enter_done_locked(self: &Arc<Self>, inner: &mut Inner, epoch: u64, id: &JobId) {
        inner.notified_for = Some(id.clone());
        if let Some(estimator) = inner.estimator.take() {
            estimator.stop();
        }
        inner.snapshot.progress = 100.0;
        self.engine.stop();
        if let Some(token) = inner.driver.take() {
            token.cancel();
        }
        inner.snapshot.phase = Phase::Done;
        self.publish_locked(inner);

        counter!("jobwatch_jobs_completed_total", "kind" => self.profile.kind.to_string()).increment(1);
        info!(kind = %self.profile.kind, job_id = %id, "job completed");

        let token = CancellationToken::new();
        inner.reset_timer = Some(token.clone());
        tokio::spawn(auto_reset(
            Arc::downgrade(self),
            epoch,
            self.profile.auto_reset_delay,
            token,
        ));
    }

    fn enter_error_locked(&self, inner: &mut Inner, error: &TrackerError) {
        inner.snapshot.phase = Phase::Error;
        inner.snapshot.error = Some(error.user_message().to_string());
        inner.snapshot.error_code = Some(error.code());
        self.publish_locked(inner);

        counter!(
            "jobwatch_jobs_failed_total",
            "kind" => self.profile.kind.to_string(),
            "code" => error.code().to_string(),
        )
        .increment(1);
        warn!(
            kind = %self.profile.kind,
            job_id = ?inner.snapshot.job_id,
            error_code = %error.code(),
            "submission failed: {}",
            error.user_message()
        );
    }

    fn on_reset_due(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.snapshot.phase != Phase::Done {
            return;
        }
        inner.reset_timer = None;
        inner.notified_for = None;
        inner.snapshot = LifecycleSnapshot::idle(self.profile.kind);
        self.publish_locked(&inner);
        debug!(kind = %self.profile.kind, "auto-reset to idle");
    }

    /// Stop the estimator, the poll session, the driver and the reset timer.
    fn teardown_locked(&self, inner: &mut Inner) {
        if let Some(token) = inner.driver.take() {
            token.cancel();
        }
        if let Some(token) = inner.reset_timer.take() {
            token.cancel();
        }
        if let Some(estimator) = inner.estimator.take() {
            estimator.stop();
        }
        self.engine.stop();
    }

    fn publish_locked(&self, inner: &Inner) {
        self.state_tx.send_replace(inner.snapshot.clone());
    }
}

impl Drop for JobLifecycle {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(token) = inner.driver.take() {
            token.cancel();
        }
        if let Some(token) = inner.reset_timer.take() {
            token.cancel();
        }
        if let Some(estimator) = inner.estimator.take() {
            estimator.stop();
        }
    }
}

fn success_notice(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Create => "Created successfully!",
        JobKind::Import => "Job imported",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Background Tasks
// ═══════════════════════════════════════════════════════════════════════════════

async fn create_job(
    lifecycle: Weak<JobLifecycle>,
    store: Arc<dyn JobStore>,
    epoch: u64,
    job: NewJob,
    token: CancellationToken,
) {
    let created = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        created = store.create(&job) => created,
    };
    if let Some(lifecycle) = lifecycle.upgrade() {
        lifecycle.on_created(epoch, created);
    }
}

async fn watch_session(
    lifecycle: Weak<JobLifecycle>,
    epoch: u64,
    mut poll_rx: watch::Receiver<PollState<JobRecord>>,
    mut progress_rx: watch::Receiver<f64>,
    token: CancellationToken,
) {
    let mut progress_open = true;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            changed = poll_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = progress_rx.changed(), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
            }
        }

        let Some(this) = lifecycle.upgrade() else {
            return;
        };
        let poll = poll_rx.borrow_and_update().clone();
        let _ = progress_rx.borrow_and_update();
        if !this.on_poll_update(epoch, &poll) {
            return;
        }
    }
}

async fn auto_reset(
    lifecycle: Weak<JobLifecycle>,
    epoch: u64,
    delay: std::time::Duration,
    token: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }
    if let Some(lifecycle) = lifecycle.upgrade() {
        lifecycle.on_reset_due(epoch);
    }
}
