//! HTTP job store client.
//!
//! Talks to a REST collection of job records:
//!
//! | call     | request            |
//! |----------|--------------------|
//! | create   | `POST {base}`      |
//! | fetch    | `GET {base}/{id}`  |
//! | update   | `PUT {base}/{id}`  |
//! | list     | `GET {base}`       |
//! | delete   | `DELETE {base}/{id}` |
//!
//! Requests are spaced by a minimum gap so that bursts of polls and updates
//! stay under the store's rate limit. Non-success statuses are classified
//! through [`ErrorCode::from_http_status`](crate::error::ErrorCode) and a
//! `Retry-After` header (in seconds) is carried on the error.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{JobId, JobPatch, JobRecord, JobStore, NewJob};
use crate::config::StoreConfig;
use crate::error::{Result, TrackerError};

/// Enforces a minimum gap between consecutive requests.
#[derive(Debug)]
struct RequestThrottle {
    min_gap: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last: Mutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_gap;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Job store reached over HTTP.
#[derive(Debug)]
pub struct HttpJobStore {
    client: Client,
    base_url: String,
    throttle: RequestThrottle,
}

impl HttpJobStore {
    /// Create a client for the store described by `config`.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(TrackerError::from)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            throttle: RequestThrottle::new(config.min_request_gap),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, id: &JobId) -> String {
        format!("{}/{}", self.base_url, id)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.throttle.wait_turn().await;

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            let error = TrackerError::from_status(status.as_u16(), body);
            return Err(match retry_after {
                Some(delay) => error.with_retry_after(delay),
                None => error,
            });
        }

        Ok(resp.json::<T>().await?)
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// Zero and unparseable values carry no hint.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn create(&self, job: &NewJob) -> Result<JobRecord> {
        tracing::debug!(name = %job.name, "creating job");
        self.execute(self.client.post(&self.base_url).json(job)).await
    }

    async fn fetch(&self, id: &JobId, cancel: &CancellationToken) -> Result<JobRecord> {
        if cancel.is_cancelled() {
            return Err(TrackerError::cancelled());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrackerError::cancelled()),
            result = self.execute(self.client.get(self.job_url(id))) => result,
        }
    }

    async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<JobRecord> {
        self.execute(self.client.put(self.job_url(id)).json(patch)).await
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        self.execute(self.client.get(&self.base_url)).await
    }

    async fn delete(&self, id: &JobId) -> Result<JobRecord> {
        self.execute(self.client.delete(self.job_url(id))).await
    }
}
