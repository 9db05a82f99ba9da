//! Job records as observed by the client.
//!
//! The authoritative copy of a job lives in the job store. This module only
//! models the minimal shape the poller consumes:
//!
//! - **JobId**: opaque identifier assigned by the store
//! - **JobStatus**: `queued`, `processing`, `completed` or `failed`
//! - **JobRecord**: id, name, status tag and numeric progress
//! - **NewJob / JobPatch**: payloads for creating and updating records

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{Result, TrackerError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier of a job in the job store.
///
/// Stores hand out either numbers or strings; both are normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create from any string-like identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "job id must be a string or number, got {}",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status tag reported by the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Queued,
    /// Being worked on
    Processing,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
}

impl JobStatus {
    /// Check if the store will not move the job any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// The kinds of submission a lifecycle can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A job created from a name typed by the user
    Create,
    /// A job created from an imported file
    Import,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Import => write!(f, "import"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A job as returned by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Store-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    /// Human name
    #[serde(default)]
    pub name: String,
    /// Status tag (unset on freshly created records of some stores)
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<JobStatus>,
    /// Progress in percent (0-100, may be fractional)
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: Option<f64>,
}

impl JobRecord {
    /// Create a record with the given id, status and progress.
    pub fn new(id: impl Into<JobId>, status: JobStatus, progress: f64) -> Self {
        Self {
            id: Some(id.into()),
            name: String::new(),
            status: Some(status),
            progress: Some(progress),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Check whether the record reports a finished job.
    ///
    /// A job counts as finished once the store tags it `completed` or reports
    /// at least 100 percent, whichever comes first.
    pub fn is_finished(&self) -> bool {
        self.status == Some(JobStatus::Completed) || self.progress.map_or(false, |p| p >= 100.0)
    }

    /// The identifier, or a creation error if the store did not assign one.
    pub fn require_id(&self, kind: JobKind) -> Result<JobId> {
        self.id
            .clone()
            .filter(|id| !id.as_str().is_empty())
            .ok_or_else(|| {
                let message = match kind {
                    JobKind::Create => "Create succeeded but no id returned.",
                    JobKind::Import => "Import succeeded but no id returned.",
                };
                TrackerError::new(crate::error::ErrorCode::MissingJobId, message)
            })
    }
}

/// Payload for creating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Human name
    pub name: String,
    /// Initial status
    pub status: JobStatus,
    /// Initial progress
    pub progress: f64,
}

impl NewJob {
    /// Build a queued job with zero progress, trimming the name.
    ///
    /// Blank names are rejected.
    pub fn queued(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TrackerError::validation("Please enter a job name."));
        }
        Ok(Self {
            name: trimmed.to_string(),
            status: JobStatus::Queued,
            progress: 0.0,
        })
    }
}

/// Partial update of a job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl JobPatch {
    /// Patch both status and progress.
    pub fn new(status: JobStatus, progress: f64) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
        }
    }

    /// Apply the patch to a record.
    pub fn apply(&self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = Some(status);
        }
        if let Some(progress) = self.progress {
            record.progress = Some(progress);
        }
    }
}

// Unknown status tags read as unset instead of failing the whole record.
fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<Option<JobStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

// Stores may send progress as a number or a numeric string.
fn lenient_progress<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let progress = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(progress.filter(|p| p.is_finite()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_job_id_from_number_or_string() {
        let record: JobRecord = serde_json::from_str(r#"{"id": 42, "name": "a"}"#).unwrap();
        assert_eq!(record.id, Some(JobId::new("42")));

        let record: JobRecord = serde_json::from_str(r#"{"id": "42", "name": "a"}"#).unwrap();
        assert_eq!(record.id, Some(JobId::new("42")));
    }

    #[test]
    fn test_lenient_progress() {
        let record: JobRecord =
            serde_json::from_str(r#"{"id":"1","status":"processing","progress":"35.5"}"#).unwrap();
        assert_eq!(record.progress, Some(35.5));
        assert_eq!(record.status, Some(JobStatus::Processing));

        let record: JobRecord = serde_json::from_str(r#"{"id":"1","progress":null}"#).unwrap();
        assert_eq!(record.progress, None);

        let record: JobRecord = serde_json::from_str(r#"{"id":"1","progress":"soon"}"#).unwrap();
        assert_eq!(record.progress, None);
    }

    #[test]
    fn test_unknown_status_reads_as_unset() {
        let record: JobRecord = serde_json::from_str(r#"{"id":"1","status":"archived"}"#).unwrap();
        assert_eq!(record.status, None);
    }

    #[test]
    fn test_is_finished() {
        assert!(JobRecord::new("1", JobStatus::Completed, 10.0).is_finished());
        assert!(JobRecord::new("1", JobStatus::Processing, 100.0).is_finished());
        assert!(!JobRecord::new("1", JobStatus::Processing, 99.9).is_finished());
        assert!(!JobRecord::new("1", JobStatus::Failed, 40.0).is_finished());
    }

    #[test]
    fn test_require_id() {
        let record = JobRecord::new("7", JobStatus::Queued, 0.0);
        assert_eq!(record.require_id(JobKind::Create).unwrap(), JobId::new("7"));

        let record: JobRecord = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        let error = record.require_id(JobKind::Create).unwrap_err();
        assert_eq!(error.code(), ErrorCode::MissingJobId);
        assert_eq!(error.user_message(), "Create succeeded but no id returned.");
        let error = record.require_id(JobKind::Import).unwrap_err();
        assert_eq!(error.user_message(), "Import succeeded but no id returned.");
    }

    #[test]
    fn test_new_job_trims_and_rejects_blank() {
        let job = NewJob::queued("  Tetris  ").unwrap();
        assert_eq!(job.name, "Tetris");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);

        let error = NewJob::queued("   ").unwrap_err();
        assert_eq!(error.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = JobPatch {
            progress: Some(55.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), serde_json::json!({"progress": 55.0}));

        let mut record = JobRecord::new("1", JobStatus::Queued, 0.0);
        JobPatch::new(JobStatus::Processing, 20.0).apply(&mut record);
        assert_eq!(record.status, Some(JobStatus::Processing));
        assert_eq!(record.progress, Some(20.0));
    }
}
