//! Telemetry: structured logging.
//!
//! Metrics are emitted through the `metrics` facade at their call sites
//! (`jobwatch_errors_total`, `jobwatch_poll_cycles_total`,
//! `jobwatch_jobs_completed_total`, `jobwatch_jobs_failed_total`); installing
//! a recorder is left to the embedding application.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
