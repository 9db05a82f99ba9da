//! Server-side progress simulation for stores that do not execute work.
//!
//! Mock job stores only persist what they are sent, so demos drive a job
//! through its progress steps by updating the record from the client side.

use std::time::Duration;

use super::{JobId, JobPatch, JobStatus, JobStore};
use crate::error::Result;

/// Progress values written after the initial `processing 0%` update.
pub const SIMULATION_STEPS: [f64; 7] = [8.0, 20.0, 35.0, 55.0, 75.0, 92.0, 100.0];

/// Default wait between two simulated steps.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(800);

/// Walk a job through the simulation steps, tagging the last one `completed`.
///
/// A failure of the initial reset is ignored; later failures abort the run.
pub async fn simulate_server_work<S>(store: &S, id: &JobId, step_delay: Duration) -> Result<()>
where
    S: JobStore + ?Sized,
{
    if let Err(error) = store.update(id, &JobPatch::new(JobStatus::Processing, 0.0)).await {
        tracing::debug!(job_id = %id, error = %error, "initial simulation update failed");
    }

    for progress in SIMULATION_STEPS {
        tokio::time::sleep(step_delay).await;
        let status = if progress >= 100.0 {
            JobStatus::Completed
        } else {
            JobStatus::Processing
        };
        store.update(id, &JobPatch::new(status, progress)).await?;
        tracing::trace!(job_id = %id, progress, "simulated progress step");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobRecord, MemoryJobStore};
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_simulation_reaches_completed() {
        let store = MemoryJobStore::new();
        let id = store.insert(JobRecord::new("1", JobStatus::Queued, 0.0));

        let run = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { simulate_server_work(&store, &id, DEFAULT_STEP_DELAY).await })
        };

        tokio::time::sleep(DEFAULT_STEP_DELAY * 2 + Duration::from_millis(10)).await;
        let midway = store.fetch(&id, &CancellationToken::new()).await.unwrap();
        assert_eq!(midway.status, Some(JobStatus::Processing));
        assert_eq!(midway.progress, Some(20.0));

        run.await.unwrap().unwrap();
        let done = store.fetch(&id, &CancellationToken::new()).await.unwrap();
        assert_eq!(done.status, Some(JobStatus::Completed));
        assert_eq!(done.progress, Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_fails_for_unknown_job() {
        let store = MemoryJobStore::new();
        let result = simulate_server_work(&store, &JobId::new("99"), Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
