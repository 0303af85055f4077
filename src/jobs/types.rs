//! Job records and progress event shapes
//!
//! These structs are shared by the store, the Docker producers and the
//! progress reporter. Their JSON form is what ends up in tool results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique job identifier (UUID v7 string)
pub type JobId = String;

/// Free-form context captured when a job is created
pub type JobMeta = Map<String, Value>;

/// What kind of background work a job tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// `docker pull`
    #[serde(rename = "docker.pull")]
    ImagePull,
    /// `docker exec`
    #[serde(rename = "docker.exec")]
    Exec,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ImagePull => "docker.pull",
            JobKind::Exec => "docker.exec",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job
///
/// `Pending -> Running -> {Succeeded | Failed | Cancelled}`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transitions or events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse stage of an image pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPhase {
    Resolving,
    Downloading,
    Extracting,
    Verifying,
    Done,
    Waiting,
    Unknown,
}

impl PullPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPhase::Resolving => "resolving",
            PullPhase::Downloading => "downloading",
            PullPhase::Extracting => "extracting",
            PullPhase::Verifying => "verifying",
            PullPhase::Done => "done",
            PullPhase::Waiting => "waiting",
            PullPhase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PullPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single image layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl LayerProgress {
    /// 100% downloaded, or a status such as "Pull complete"
    pub fn is_complete(&self) -> bool {
        self.percent.unwrap_or(0) >= 100
            || self
                .status
                .as_deref()
                .map(|s| s.to_ascii_lowercase().contains("complete"))
                .unwrap_or(false)
    }
}

/// Structured detail for `docker.pull` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullDetail {
    pub phase: PullPhase,
    /// Overall percent, absent until something can be computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub layers: BTreeMap<String, LayerProgress>,
    /// Image reference that was requested
    #[serde(rename = "ref")]
    pub image_ref: String,
}

impl PullDetail {
    /// Layers that are finished (100% or a "complete" status)
    pub fn completed_layers(&self) -> usize {
        self.layers
            .values()
            .filter(|layer| layer.is_complete())
            .count()
    }
}

/// Structured detail for `docker.exec` events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecDetail {
    pub bytes_out: u64,
    pub bytes_err: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_tail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

/// Kind-specific payload of a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressDetail {
    Pull(PullDetail),
    Exec(ExecDetail),
    Other(Value),
}

/// A point-in-time update recorded against a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Epoch milliseconds
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProgressDetail>,
}

impl ProgressEvent {
    /// Create an event stamped with the current wall-clock time
    pub fn now(message: Option<String>, detail: Option<ProgressDetail>) -> Self {
        Self {
            ts: now_ms(),
            message,
            detail,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::now(Some(message.into()), None)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Handle returned to callers instead of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub id: JobId,
    pub kind: JobKind,
}

/// Normalized error stored on a failed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Normalize any error, keeping its `source()` chain as the stack text
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            name: None,
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for JobError {}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        JobError::new(message)
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        JobError::new(message)
    }
}

/// How a job settled
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Value),
    Failed(JobError),
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded(_) => JobStatus::Succeeded,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Consistent copy of a job taken under the store lock
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub meta: JobMeta,
    /// Epoch milliseconds
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<ProgressEvent>,
    pub history: Vec<ProgressEvent>,
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobSnapshot {
    pub fn job_ref(&self) -> JobRef {
        JobRef {
            id: self.id.clone(),
            kind: self.kind,
        }
    }

    /// Terminal outcome, `None` while the job is still pending or running
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            JobStatus::Succeeded => Some(JobOutcome::Succeeded(
                self.final_value.clone().unwrap_or(Value::Null),
            )),
            JobStatus::Failed => Some(JobOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| JobError::new("job failed")),
            )),
            JobStatus::Cancelled => Some(JobOutcome::Cancelled),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }
}
