//! Result of a tool call: a value now, or a job to wait on

use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use super::reporter::{MessageSink, ProgressReporter, ReporterOptions};
use crate::jobs::JobRef;

/// Interval used when settling tool results
pub const TOOL_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// What a job-producing operation hands back
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Finished synchronously
    Value(Value),
    /// Still running in the background
    Job(JobRef),
}

impl From<JobRef> for ToolOutput {
    fn from(job: JobRef) -> Self {
        ToolOutput::Job(job)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Value(value)
    }
}

impl ToolOutput {
    /// Resolve to a final value, streaming progress when it is a job
    ///
    /// A failed, cancelled or unknown job becomes `{"name", "message"}`
    /// rather than an error, so the caller always has something to return.
    pub async fn settle(
        self,
        reporter: &ProgressReporter,
        operation: &str,
        sink: &dyn MessageSink,
    ) -> Value {
        self.settle_every(reporter, operation, TOOL_REPORT_INTERVAL, sink)
            .await
    }

    /// `settle` with a custom progress interval
    pub async fn settle_every(
        self,
        reporter: &ProgressReporter,
        operation: &str,
        interval: Duration,
        sink: &dyn MessageSink,
    ) -> Value {
        let job = match self {
            ToolOutput::Value(value) => return value,
            ToolOutput::Job(job) => job,
        };

        let options = ReporterOptions::default()
            .with_interval(interval)
            .with_prefix(format!("Job {} :: {}", job.kind, operation));

        match reporter.stream_progress(&job, options, sink).await {
            Ok(value) => value,
            Err(e) => {
                warn!(job_id = %job.id, operation, error = %e, "job did not succeed");
                json!({ "name": e.name(), "message": e.message() })
            }
        }
    }
}
