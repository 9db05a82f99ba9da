#![allow(clippy::result_large_err)]
//! # Jobwatch Core
//!
//! Client-side tracking of long-running, server-executed jobs that can only
//! be observed by polling a status endpoint.
//!
//! ## Architecture
//!
//! - **Poll Engine**: periodic polling with adaptive backoff, jitter, an absolute timeout and cooperative cancellation
//! - **Progress Estimator**: optimistic local progress fused with server progress, never decreasing
//! - **Job Lifecycle**: `idle → creating → polling → done` state machine with single-flight submission and exactly-once completion
//! - **Jobs**: job records, the job-store contract, an HTTP store and an in-memory store
//! - **Notify**: fire-and-forget user notices
//! - **Telemetry**: structured logging

pub mod config;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod poll;
pub mod progress;
pub mod telemetry;

pub use error::{ErrorCode, ErrorSeverity, Result, TrackerError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, JobProfile, StoreConfig};
    pub use crate::error::{ErrorCode, ErrorSeverity, Result, TrackerError};
    pub use crate::jobs::{
        simulate_server_work, HttpJobStore, JobId, JobKind, JobPatch, JobRecord, JobStatus,
        JobStore, MemoryJobStore, NewJob,
    };
    pub use crate::lifecycle::{JobLifecycle, LifecycleSnapshot, Phase, Submission};
    pub use crate::notify::{NoticeKind, Notifier, RecordingNotifier, TracingNotifier};
    pub use crate::poll::{PollConfig, PollEngine, PollSettings, PollState};
    pub use crate::progress::{EstimatorSettings, ProgressEstimator};
    pub use crate::telemetry::{init_logging, LogFormat, LoggingConfig};
}
