//! Progress Reporter - turns a job's event stream into chat messages
//!
//! ```text
//! subscription ──► first event ─────────────► sink (immediately)
//!              ──► later events ─► latest ──► sink (at most once per tick)
//!              ──► terminal ────────────────► sink, then resolve/reject
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::format::format_progress;
use crate::jobs::{
    JobError, JobId, JobOutcome, JobRef, JobSignal, JobStatus, ProgressEvent, ProgressStore,
    StoreError,
};
use crate::metrics::PROGRESS_MESSAGES;

/// Default time between progress messages
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest interval accepted
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Where formatted progress lines go
pub trait MessageSink: Send + Sync {
    fn dispatch(&self, text: String);
}

impl<F> MessageSink for F
where
    F: Fn(String) + Send + Sync,
{
    fn dispatch(&self, text: String) {
        self(text)
    }
}

impl MessageSink for mpsc::UnboundedSender<String> {
    fn dispatch(&self, text: String) {
        // receiver gone means nobody is listening any more
        let _ = self.send(text);
    }
}

/// Prints every line to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn dispatch(&self, text: String) {
        debug!(target: "dockerina::progress", "{}", text);
        println!("{}", text);
    }
}

/// Per-call reporter settings
#[derive(Debug, Clone, Default)]
pub struct ReporterOptions {
    /// Zero means `DEFAULT_INTERVAL`; anything else is floored at `MIN_INTERVAL`
    pub interval: Duration,
    /// Defaults to `"Progress (<kind>)"`
    pub prefix: Option<String>,
}

impl ReporterOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The interval actually used
    pub fn effective_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.interval.max(MIN_INTERVAL)
        }
    }
}

/// Why `stream_progress` did not produce a value
#[derive(Debug, Clone, PartialEq)]
pub enum ReportError {
    /// Unknown or already expired job id
    NotFound(JobId),
    /// The job settled as failed
    Failed(JobError),
    /// The job was cancelled
    Cancelled(JobId),
}

impl ReportError {
    /// Short error name, as used in tool results
    pub fn name(&self) -> String {
        match self {
            ReportError::NotFound(_) => "NotFound".to_string(),
            ReportError::Failed(error) => {
                error.name.clone().unwrap_or_else(|| "JobFailed".to_string())
            }
            ReportError::Cancelled(_) => "Cancelled".to_string(),
        }
    }

    /// Human-readable message without the name
    pub fn message(&self) -> String {
        match self {
            ReportError::NotFound(id) => format!("Job not found: {}", id),
            ReportError::Failed(error) => error.message.clone(),
            ReportError::Cancelled(id) => format!("Job {} was cancelled", id),
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Follows jobs in a shared store and reports on them
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<ProgressStore>,
}

impl ProgressReporter {
    pub fn new(store: Arc<ProgressStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Stream a job's progress into `sink` and wait for its final value
    ///
    /// The first progress event is sent right away. After that, the most
    /// recent event is sent at most once per interval; events in between
    /// are coalesced. Exactly one terminal line is sent before returning.
    pub async fn stream_progress(
        &self,
        job: &JobRef,
        options: ReporterOptions,
        sink: &dyn MessageSink,
    ) -> Result<Value, ReportError> {
        let prefix = options
            .prefix
            .clone()
            .unwrap_or_else(|| format!("Progress ({})", job.kind));
        let period = options.effective_interval();
        let kind = job.kind.as_str();

        let send = |text: String| {
            PROGRESS_MESSAGES.with_label_values(&[kind]).inc();
            sink.dispatch(text);
        };

        let mut subscription = match self.store.subscribe(&job.id) {
            Ok(subscription) => subscription,
            Err(StoreError::NotFound(id)) => return Err(ReportError::NotFound(id)),
            Err(StoreError::AlreadyTerminal { id, .. }) => {
                let outcome = self
                    .store
                    .get(&id)
                    .and_then(|snapshot| snapshot.outcome())
                    .ok_or_else(|| ReportError::NotFound(id.clone()))?;
                return settle(&prefix, &id, outcome, &send);
            }
        };

        debug!(job_id = %job.id, interval_ms = period.as_millis() as u64, "reporting progress");

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sampler = Sampler::default();
        if let Some(event) = subscription.last_seen().cloned() {
            if let Some(event) = sampler.observe(event) {
                send(format_progress(&prefix, JobStatus::Running, &event));
            }
        }

        loop {
            tokio::select! {
                // queued events are folded in before a tick samples them
                biased;

                signal = subscription.recv() => match signal {
                    Some(JobSignal::Progress(event)) => {
                        if let Some(event) = sampler.observe(event) {
                            send(format_progress(&prefix, JobStatus::Running, &event));
                        }
                    }
                    Some(JobSignal::Terminal(outcome)) => {
                        return settle(&prefix, &job.id, outcome, &send);
                    }
                    // settle() always delivers Terminal before the senders drop
                    None => {
                        info!(job_id = %job.id, "job vanished while reporting");
                        return Err(ReportError::NotFound(job.id.clone()));
                    }
                },
                _ = ticker.tick() => {
                    if let Some(event) = sampler.take_due() {
                        send(format_progress(&prefix, JobStatus::Running, &event));
                    }
                }
            }
        }
    }
}

/// Latest-wins sampling state
#[derive(Debug, Default)]
struct Sampler {
    /// Newest event not yet sent
    pending: Option<ProgressEvent>,
    /// Timestamp of the last event sent
    sent_ts: Option<i64>,
}

impl Sampler {
    /// Record an event; returns it when it is the first one and must go out now
    fn observe(&mut self, event: ProgressEvent) -> Option<ProgressEvent> {
        if self.sent_ts.is_none() {
            self.sent_ts = Some(event.ts);
            return Some(event);
        }
        self.pending = Some(event);
        None
    }

    /// Pending event, unless it is no newer than what was already sent
    fn take_due(&mut self) -> Option<ProgressEvent> {
        let event = self.pending.take()?;
        if self.sent_ts.map(|ts| event.ts <= ts).unwrap_or(false) {
            return None;
        }
        self.sent_ts = Some(event.ts);
        Some(event)
    }
}

fn settle(
    prefix: &str,
    id: &str,
    outcome: JobOutcome,
    send: &impl Fn(String),
) -> Result<Value, ReportError> {
    match outcome {
        JobOutcome::Succeeded(value) => {
            send(format!("{}: completed.", prefix));
            Ok(value)
        }
        JobOutcome::Failed(error) => {
            send(format!("{}: failed - {}", prefix, error.message));
            Err(ReportError::Failed(error))
        }
        JobOutcome::Cancelled => {
            send(format!("{}: cancelled.", prefix));
            Err(ReportError::Cancelled(id.to_string()))
        }
    }
}
