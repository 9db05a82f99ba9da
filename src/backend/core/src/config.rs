//! Configuration management.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! `JOBWATCH__*` environment variables (e.g. `JOBWATCH__STORE__BASE_URL`,
//! `JOBWATCH__CREATE__POLL__INTERVAL=2s`). Durations use humantime notation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::jobs::JobKind;
use crate::poll::PollSettings;
use crate::progress::EstimatorSettings;
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "JOBWATCH";

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Job store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Profile for created jobs
    #[serde(default = "JobProfile::for_create")]
    pub create: JobProfile,

    /// Profile for imports
    #[serde(default = "JobProfile::for_import")]
    pub import: JobProfile,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            create: JobProfile::for_create(),
            import: JobProfile::for_import(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the job collection
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Minimum gap between two requests
    #[serde(default = "default_min_request_gap", with = "humantime_serde")]
    pub min_request_gap: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            min_request_gap: default_min_request_gap(),
        }
    }
}

/// Tuning for one kind of job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProfile {
    /// Which kind of job this profile drives
    pub kind: JobKind,

    /// Polling parameters while the job runs
    #[serde(default)]
    pub poll: PollSettings,

    /// Optimistic progress ticker
    #[serde(default)]
    pub estimator: EstimatorSettings,

    /// How long the finished state stays visible before resetting to idle
    #[serde(default = "default_auto_reset_delay", with = "humantime_serde")]
    pub auto_reset_delay: Duration,
}

impl JobProfile {
    /// Profile for jobs created from a name.
    pub fn for_create() -> Self {
        Self {
            kind: JobKind::Create,
            poll: PollSettings::default()
                .with_interval(Duration::from_millis(2500))
                .with_timeout(Duration::from_secs(180)),
            estimator: EstimatorSettings::for_create(),
            auto_reset_delay: Duration::from_millis(800),
        }
    }

    /// Profile for imported jobs.
    pub fn for_import() -> Self {
        Self {
            kind: JobKind::Import,
            poll: PollSettings::default()
                .with_interval(Duration::from_millis(3000))
                .with_timeout(Duration::from_secs(180)),
            estimator: EstimatorSettings::for_import(),
            auto_reset_delay: Duration::from_millis(1000),
        }
    }

    /// Check poll and estimator invariants.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.estimator.validate()
    }
}

// Default value functions
fn default_base_url() -> String { "http://localhost:3000/jobs".to_string() }
fn default_request_timeout() -> Duration { Duration::from_secs(15) }
fn default_min_request_gap() -> Duration { Duration::from_millis(900) }
fn default_auto_reset_delay() -> Duration { Duration::from_secs(1) }

impl Config {
    /// Load configuration from defaults and environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Profile for a job kind.
    pub fn profile(&self, kind: JobKind) -> &JobProfile {
        match kind {
            JobKind::Create => &self.create,
            JobKind::Import => &self.import,
        }
    }

    /// Check every section's invariants.
    pub fn validate(&self) -> Result<()> {
        self.create.validate()?;
        self.import.validate()
    }
}
