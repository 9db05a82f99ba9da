//! Jobs as seen from the client.
//!
//! - **Records**: the minimal job shape the poller consumes
//! - **Store**: the job-store contract plus an in-memory store
//! - **HTTP**: a REST job-store client with throttling and retry hints
//! - **Simulation**: demo helper that drives progress on mock stores

pub mod http;
pub mod job;
pub mod simulate;
pub mod store;

pub use http::HttpJobStore;
pub use job::{JobId, JobKind, JobPatch, JobRecord, JobStatus, NewJob};
pub use simulate::{simulate_server_work, DEFAULT_STEP_DELAY, SIMULATION_STEPS};
pub use store::{JobStore, MemoryJobStore};
