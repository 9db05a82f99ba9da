//! Integration tests for the poll engine.
//!
//! Tests cover:
//! - Backoff growth, ceiling and reset on success
//! - Server retry hints
//! - Session timeout
//! - Restart and stop semantics
//! - Sequential cycles
//!
//! All timing tests run on a paused clock with zero jitter.

use futures::future::BoxFuture;
use jobwatch_core::error::{ErrorCode, TrackerError};
use jobwatch_core::jobs::{JobId, JobRecord, JobStatus, JobStore, MemoryJobStore};
use jobwatch_core::poll::{PollConfig, PollEngine, PollSettings, PollState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Operation = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, jobwatch_core::Result<JobRecord>> + Send + Sync>;

fn settings(interval_ms: u64, max_ms: u64, factor: f64) -> PollSettings {
    PollSettings::default()
        .with_interval(Duration::from_millis(interval_ms))
        .with_max_interval(Duration::from_millis(max_ms))
        .with_backoff_factor(factor)
        .with_jitter(Duration::ZERO)
        .with_timeout(Duration::from_secs(600))
}

fn until_completed(settings: PollSettings) -> PollConfig<JobRecord> {
    PollConfig::new(settings)
        .unwrap()
        .stop_when(|record: &JobRecord| record.status == Some(JobStatus::Completed))
}

fn op<F, Fut>(f: F) -> Operation
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = jobwatch_core::Result<JobRecord>> + Send + 'static,
{
    Arc::new(
        move |cancel: CancellationToken| -> BoxFuture<'static, jobwatch_core::Result<JobRecord>> {
            Box::pin(f(cancel))
        },
    )
}

fn poll_store(store: &MemoryJobStore, id: &str) -> Operation {
    let store = store.clone();
    let id = JobId::new(id);
    op(move |cancel| {
        let store = store.clone();
        let id = id.clone();
        async move { store.fetch(&id, &cancel).await }
    })
}

fn start(engine: &PollEngine<JobRecord>, op: Operation, config: PollConfig<JobRecord>) -> watch::Receiver<PollState<JobRecord>> {
    engine.start(move |cancel| op(cancel), config)
}

async fn wait_stopped(rx: &mut watch::Receiver<PollState<JobRecord>>) -> PollState<JobRecord> {
    tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|state| !state.running))
        .await
        .expect("session did not end")
        .unwrap()
        .clone()
}

fn gaps_ms(log: &[(JobId, Instant)]) -> Vec<u64> {
    log.windows(2)
        .map(|pair| (pair[1].1 - pair[0].1).as_millis() as u64)
        .collect()
}

fn assert_gap(actual: u64, expected: u64) {
    assert!(
        actual.abs_diff(expected) <= 5,
        "expected a gap of ~{}ms, got {}ms",
        expected,
        actual
    );
}

fn processing(progress: f64) -> jobwatch_core::Result<JobRecord> {
    Ok(JobRecord::new("1", JobStatus::Processing, progress))
}

fn completed() -> jobwatch_core::Result<JobRecord> {
    Ok(JobRecord::new("1", JobStatus::Completed, 100.0))
}

// ============================================================================
// Backoff Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_caps_and_resets_on_success() {
    let store = MemoryJobStore::new();
    for _ in 0..4 {
        store.push_fetch(Err(TrackerError::from_status(429, "")));
    }
    store.push_fetch(processing(10.0));
    store.push_fetch(processing(20.0));
    store.push_fetch(completed());

    let engine = PollEngine::new("backoff");
    let mut rx = start(&engine, poll_store(&store, "1"), until_completed(settings(1000, 4000, 2.0)));
    let state = wait_stopped(&mut rx).await;

    assert!(state.error.is_none());
    assert_eq!(state.data.and_then(|r| r.status), Some(JobStatus::Completed));

    let gaps = gaps_ms(&store.fetch_log());
    assert_eq!(gaps.len(), 6);
    for (actual, expected) in gaps.iter().zip([2000, 4000, 4000, 4000, 1000, 1000]) {
        assert_gap(*actual, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_service_unavailable_is_not_surfaced() {
    let store = MemoryJobStore::new();
    store.push_fetch(Err(TrackerError::from_status(503, "")));
    store.push_fetch(Err(TrackerError::from_status(503, "")));
    store.push_fetch(completed());

    let engine = PollEngine::new("unavailable");
    let mut rx = start(&engine, poll_store(&store, "1"), until_completed(settings(100, 1000, 1.8)));
    let state = wait_stopped(&mut rx).await;

    assert!(state.error.is_none());
    assert_eq!(store.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_overrides_next_delay_once() {
    let store = MemoryJobStore::new();
    store.push_fetch(Err(TrackerError::from_status(429, "")));
    store.push_fetch(Err(TrackerError::from_status(429, "")));
    store.push_fetch(Err(
        TrackerError::from_status(429, "").with_retry_after(Duration::from_millis(5000))
    ));
    store.push_fetch(Err(TrackerError::from_status(429, "")));
    store.push_fetch(completed());

    let engine = PollEngine::new("retry-after");
    let mut rx = start(&engine, poll_store(&store, "1"), until_completed(settings(1000, 15000, 1.8)));
    let state = wait_stopped(&mut rx).await;
    assert!(state.error.is_none());

    let gaps = gaps_ms(&store.fetch_log());
    // 1000 -> 1800 -> 3240, then the hint, then growth continues from 5832
    assert_gap(gaps[0], 1800);
    assert_gap(gaps[1], 3240);
    assert_gap(gaps[2], 5000);
    assert_gap(gaps[3], 10498);
}

#[tokio::test(start_paused = true)]
async fn test_unlisted_classification_is_terminal() {
    let store = MemoryJobStore::new();
    store.push_fetch(Err(TrackerError::from_status(429, "")));

    let mut custom = settings(100, 1000, 2.0);
    custom.backoff_on = vec![ErrorCode::ServiceUnavailable];

    let engine = PollEngine::new("custom");
    let mut rx = start(&engine, poll_store(&store, "1"), until_completed(custom));
    let state = wait_stopped(&mut rx).await;

    assert_eq!(state.error.map(|e| e.code()), Some(ErrorCode::RateLimited));
    assert_eq!(store.fetch_count(), 1);
}

// ============================================================================
// Timeout Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_ends_session_with_error() {
    let store = MemoryJobStore::new();
    store.insert(JobRecord::new("1", JobStatus::Processing, 10.0));

    let engine = PollEngine::new("timeout");
    let started = Instant::now();
    let mut rx = start(
        &engine,
        poll_store(&store, "1"),
        until_completed(settings(1000, 4000, 2.0).with_timeout(Duration::from_secs(5))),
    );
    let state = wait_stopped(&mut rx).await;

    let error = state.error.expect("timeout error");
    assert_eq!(error.code(), ErrorCode::PollTimeout);
    assert_eq!(error.user_message(), "Polling timed out");
    assert_eq!(state.data.and_then(|r| r.progress), Some(10.0));
    assert!(started.elapsed() < Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_applies_while_backing_off() {
    let store = MemoryJobStore::new();
    for _ in 0..20 {
        store.push_fetch(Err(TrackerError::from_status(503, "")));
    }

    let engine = PollEngine::new("timeout-backoff");
    let mut rx = start(
        &engine,
        poll_store(&store, "1"),
        until_completed(settings(500, 2000, 2.0).with_timeout(Duration::from_secs(4))),
    );
    let state = wait_stopped(&mut rx).await;

    assert_eq!(state.error.map(|e| e.code()), Some(ErrorCode::PollTimeout));
    assert!(state.data.is_none());
}

// ============================================================================
// Restart & Stop Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_result_after_restart_is_ignored() {
    let engine = PollEngine::new("restart");

    let slow = op(|_cancel| async {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        Ok(JobRecord::new("old", JobStatus::Processing, 90.0))
    });
    let fast = op(|_cancel| async { Ok(JobRecord::new("new", JobStatus::Completed, 100.0)) });

    start(&engine, slow, until_completed(settings(100, 1000, 2.0)));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut rx = start(&engine, fast, until_completed(settings(100, 1000, 2.0)));
    wait_stopped(&mut rx).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let state = engine.snapshot();
    assert_eq!(state.data.and_then(|r| r.id), Some(JobId::new("new")));
    assert!(!state.running);
}

#[tokio::test(start_paused = true)]
async fn test_restart_clears_previous_state() {
    let store = MemoryJobStore::new();
    store.push_fetch(Err(TrackerError::from_status(404, "")));

    let engine = PollEngine::new("clear");
    let mut rx = start(&engine, poll_store(&store, "1"), until_completed(settings(100, 1000, 2.0)));
    let failed = wait_stopped(&mut rx).await;
    assert!(failed.error.is_some());

    let never = op(|cancel| async move {
        cancel.cancelled().await;
        Err(TrackerError::cancelled())
    });
    start(&engine, never, until_completed(settings(100, 1000, 2.0)));

    let state = engine.snapshot();
    assert!(state.error.is_none());
    assert!(state.data.is_none());
    assert!(state.running);
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_in_flight_call() {
    let tokens = Arc::new(Mutex::new(Vec::<CancellationToken>::new()));
    let seen = tokens.clone();
    let hanging = op(move |cancel| {
        seen.lock().push(cancel);
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(JobRecord::new("1", JobStatus::Processing, 1.0))
        }
    });

    let engine = PollEngine::new("stop");
    start(&engine, hanging, until_completed(settings(100, 1000, 2.0)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tokens.lock().len(), 1);

    engine.stop();
    assert!(tokens.lock()[0].is_cancelled());
    assert!(!engine.is_running());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tokens.lock().len(), 1);
    assert!(engine.snapshot().data.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_polling() {
    let store = MemoryJobStore::new();
    store.insert(JobRecord::new("1", JobStatus::Processing, 10.0));

    let engine = PollEngine::new("drop");
    start(&engine, poll_store(&store, "1"), until_completed(settings(100, 1000, 2.0)));
    tokio::time::sleep(Duration::from_millis(350)).await;
    drop(engine);

    let issued = store.fetch_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.fetch_count(), issued);
}

// ============================================================================
// Sequencing Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cycles_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let (flight, top, count) = (in_flight.clone(), peak.clone(), calls.clone());
    let tracked = op(move |_cancel| {
        let (flight, top, count) = (flight.clone(), top.clone(), count.clone());
        async move {
            let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
            top.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            flight.fetch_sub(1, Ordering::SeqCst);
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n >= 5 { JobStatus::Completed } else { JobStatus::Processing };
            Ok(JobRecord::new("1", status, n as f64 * 20.0))
        }
    });

    let engine = PollEngine::new("sequential");
    let mut rx = start(&engine, tracked, until_completed(settings(100, 1000, 2.0)));
    wait_stopped(&mut rx).await;

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
