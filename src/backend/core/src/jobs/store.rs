//! Job store contract and an in-memory implementation.
//!
//! The job store is the authoritative home of job records. The lifecycle
//! only needs `create` and `fetch`; the remaining calls serve the CLI and the
//! server-work simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{JobId, JobPatch, JobRecord, NewJob};
use crate::error::{ErrorCode, Result, TrackerError};

/// Trait for job store clients.
///
/// `fetch` failures must be classified through [`ErrorCode`] so the poll
/// engine can tell transient failures (`RateLimited`, `ServiceUnavailable`)
/// from terminal ones. A cancelled fetch returns an error whose code is
/// [`ErrorCode::Cancelled`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job and return the stored record.
    async fn create(&self, job: &NewJob) -> Result<JobRecord>;

    /// Fetch the current record of a job.
    async fn fetch(&self, id: &JobId, cancel: &CancellationToken) -> Result<JobRecord>;

    /// Apply a partial update.
    async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<JobRecord>;

    /// List all jobs.
    async fn list(&self) -> Result<Vec<JobRecord>>;

    /// Delete a job, returning the removed record.
    async fn delete(&self, id: &JobId) -> Result<JobRecord>;
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<u64, JobRecord>,
    next_id: u64,
    fetch_script: VecDeque<Result<JobRecord>>,
    create_script: VecDeque<Result<JobRecord>>,
    fetch_log: Vec<(JobId, Instant)>,
    creates: usize,
}

/// In-memory job store for testing and offline demos.
///
/// Records live in a map keyed by sequential numeric ids. Fetch and create
/// outcomes can be scripted ahead of time; once a script is exhausted the
/// store answers from its records.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
    fetch_latency: Duration,
    create_latency: Duration,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency` (honouring cancellation).
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = latency;
        self
    }

    /// Delay every create call by `latency`.
    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = latency;
        self
    }

    /// Queue the outcome of the next unscripted fetch.
    pub fn push_fetch(&self, outcome: Result<JobRecord>) {
        self.state.lock().fetch_script.push_back(outcome);
    }

    /// Queue the outcome of the next create call.
    pub fn push_create(&self, outcome: Result<JobRecord>) {
        self.state.lock().create_script.push_back(outcome);
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: JobRecord) -> JobId {
        let mut state = self.state.lock();
        let key = match record.id.as_ref().and_then(|id| id.as_str().parse::<u64>().ok()) {
            Some(key) => key,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        state.next_id = state.next_id.max(key);
        let id = JobId::new(key.to_string());
        state.records.insert(
            key,
            JobRecord {
                id: Some(id.clone()),
                ..record
            },
        );
        id
    }

    /// Number of create calls received.
    pub fn create_count(&self) -> usize {
        self.state.lock().creates
    }

    /// Number of fetch calls that were issued (including cancelled ones).
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetch_log.len()
    }

    /// Ids and issue times of every fetch call.
    pub fn fetch_log(&self) -> Vec<(JobId, Instant)> {
        self.state.lock().fetch_log.clone()
    }

    fn key(id: &JobId) -> Result<u64> {
        id.as_str()
            .parse::<u64>()
            .map_err(|_| TrackerError::new(ErrorCode::JobNotFound, "Job not found"))
    }

    fn not_found(id: &JobId) -> TrackerError {
        TrackerError::with_internal(ErrorCode::JobNotFound, "Job not found", format!("id {}", id))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &NewJob) -> Result<JobRecord> {
        if !self.create_latency.is_zero() {
            tokio::time::sleep(self.create_latency).await;
        }

        let mut state = self.state.lock();
        state.creates += 1;
        if let Some(outcome) = state.create_script.pop_front() {
            return outcome;
        }

        state.next_id += 1;
        let key = state.next_id;
        let record = JobRecord {
            id: Some(JobId::new(key.to_string())),
            name: job.name.clone(),
            status: Some(job.status),
            progress: Some(job.progress),
        };
        state.records.insert(key, record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: &JobId, cancel: &CancellationToken) -> Result<JobRecord> {
        self.state.lock().fetch_log.push((id.clone(), Instant::now()));

        if !self.fetch_latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TrackerError::cancelled()),
                _ = tokio::time::sleep(self.fetch_latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(TrackerError::cancelled());
        }

        let mut state = self.state.lock();
        if let Some(outcome) = state.fetch_script.pop_front() {
            return outcome;
        }
        let key = Self::key(id)?;
        state.records.get(&key).cloned().ok_or_else(|| Self::not_found(id))
    }

    async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<JobRecord> {
        let key = Self::key(id)?;
        let mut state = self.state.lock();
        let record = state.records.get_mut(&key).ok_or_else(|| Self::not_found(id))?;
        patch.apply(record);
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.state.lock().records.values().cloned().collect())
    }

    async fn delete(&self, id: &JobId) -> Result<JobRecord> {
        let key = Self::key(id)?;
        self.state.lock().records.remove(&key).ok_or_else(|| Self::not_found(id))
    }
}
