//! Polling engine.
//!
//! Repeatedly invokes an async operation until a stop condition, a terminal
//! error, a timeout or an explicit stop. Transient failures stretch the
//! interval geometrically up to a ceiling; a server retry hint overrides the
//! next delay once.

pub mod backoff;
pub mod config;
pub mod engine;

pub use backoff::{jittered, Backoff};
pub use config::{PollConfig, PollSettings, StopPredicate};
pub use engine::{PollEngine, PollState};
