//! Progress Store - in-memory registry of background jobs
//!
//! Every long-running Docker operation gets a job here. The producer task is
//! the only writer of a job; any number of subscribers receive its events
//! through their own unbounded channel.
//!
//! # Lifecycle
//!
//! ```text
//! create_job() ──► Pending ──► Running ──► Succeeded | Failed | Cancelled
//!                     │           ▲                   │
//!                     └─ update() ┘                   ▼
//!                                          kept for `ttl`, then swept
//! ```
//!
//! Nothing is persisted. A restart loses all jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::*;
use crate::metrics::{JOBS_ACTIVE, JOBS_CREATED, JOBS_FINISHED, JOB_DURATION};

/// How long a settled job stays queryable
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(30 * 60);

/// Message delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum JobSignal {
    /// One per `update()`, in the order the producer recorded them
    Progress(ProgressEvent),
    /// Sent once, after the last progress event
    Terminal(JobOutcome),
}

/// Error type for store lookups
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Unknown id, or the job already expired
    NotFound(JobId),
    /// The job settled before the subscription was made
    AlreadyTerminal { id: JobId, status: JobStatus },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Job not found: {}", id),
            StoreError::AlreadyTerminal { id, status } => {
                write!(f, "Job {} already {}", id, status)
            }
        }
    }
}

impl std::error::Error for StoreError {}

struct JobEntry {
    record: JobSnapshot,
    subscribers: Vec<(u64, mpsc::UnboundedSender<JobSignal>)>,
    settled_at: Option<Instant>,
}

impl JobEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.settled_at
            .map(|at| at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

/// Thread-safe job registry with per-job publish/subscribe
pub struct ProgressStore {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    next_subscriber: AtomicU64,
    ttl: Duration,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_TTL)
    }
}

impl ProgressStore {
    /// Create a store whose settled jobs expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a new pending job
    pub fn create_job(&self, kind: JobKind, meta: JobMeta) -> JobSnapshot {
        let record = JobSnapshot {
            id: Uuid::now_v7().to_string(),
            kind,
            status: JobStatus::Pending,
            meta,
            started_at: now_ms(),
            finished_at: None,
            last: None,
            history: Vec::new(),
            final_value: None,
            error: None,
        };

        self.write().insert(
            record.id.clone(),
            JobEntry {
                record: record.clone(),
                subscribers: Vec::new(),
                settled_at: None,
            },
        );

        JOBS_CREATED.with_label_values(&[kind.as_str()]).inc();
        JOBS_ACTIVE.inc();
        debug!(job_id = %record.id, kind = %kind, "job created");

        record
    }

    /// Look up a job; expired jobs read as absent
    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        let jobs = self.read();
        jobs.get(id)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.record.clone())
    }

    pub fn to_ref(job: &JobSnapshot) -> JobRef {
        job.job_ref()
    }

    /// `Pending -> Running`; anything else is left alone
    pub fn set_running(&self, id: &str) {
        self.with_live_job(id, "set_running", |entry| {
            if entry.record.status == JobStatus::Pending {
                entry.record.status = JobStatus::Running;
            }
        });
    }

    /// Append an event and push it to every subscriber
    pub fn update(&self, id: &str, event: ProgressEvent) {
        self.with_live_job(id, "update", |entry| {
            if entry.record.status.is_terminal() {
                debug!(job_id = %entry.record.id, "dropping update after terminal state");
                return;
            }
            if entry.record.status == JobStatus::Pending {
                entry.record.status = JobStatus::Running;
            }

            entry.record.last = Some(event.clone());
            entry.record.history.push(event.clone());
            entry
                .subscribers
                .retain(|(_, tx)| tx.send(JobSignal::Progress(event.clone())).is_ok());
        });
    }

    /// Settle the job successfully with `final_value`
    pub fn finish(&self, id: &str, final_value: Value) {
        self.settle(id, JobOutcome::Succeeded(final_value));
    }

    /// Settle the job with an error
    pub fn fail(&self, id: &str, error: impl Into<JobError>) {
        self.settle(id, JobOutcome::Failed(error.into()));
    }

    /// Settle the job as externally aborted
    pub fn cancel(&self, id: &str) {
        self.settle(id, JobOutcome::Cancelled);
    }

    /// Subscribe to a job's progress and terminal signal
    ///
    /// The returned subscription is registered before this call returns,
    /// so no update can be missed. Dropping it unsubscribes.
    pub fn subscribe(self: &Arc<Self>, id: &str) -> Result<Subscription, StoreError> {
        let mut jobs = self.write();
        let entry = jobs
            .get_mut(id)
            .filter(|entry| !entry.is_expired(self.ttl))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if entry.record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: entry.record.status,
            });
        }

        let subscriber_id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        entry.subscribers.push((subscriber_id, tx));

        Ok(Subscription {
            job_id: id.to_string(),
            subscriber_id,
            last: entry.record.last.clone(),
            rx,
            store: Arc::downgrade(self),
        })
    }

    /// Number of live subscriptions on a job
    pub fn subscriber_count(&self, id: &str) -> usize {
        self.read()
            .get(id)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of jobs currently held (including expired, unswept ones)
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every job whose retention window has passed
    ///
    /// Removing a job drops its subscriber channels, ending their streams.
    pub fn sweep_expired(&self) -> usize {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before - jobs.len();

        if removed > 0 {
            debug!(removed, remaining = jobs.len(), "expired jobs swept");
        }
        removed
    }

    /// Start the background reaper task
    ///
    /// Runs `sweep_expired` every `period` for the lifetime of the process.
    pub fn spawn_reaper(store: Arc<ProgressStore>, period: Duration) -> JoinHandle<()> {
        info!(period_ms = period.as_millis() as u64, "job reaper started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                store.sweep_expired();
            }
        })
    }

    fn settle(&self, id: &str, outcome: JobOutcome) {
        self.with_live_job(id, "settle", |entry| {
            if entry.record.status.is_terminal() {
                debug!(
                    job_id = %entry.record.id,
                    status = %entry.record.status,
                    "ignoring repeated terminal transition"
                );
                return;
            }

            let status = outcome.status();
            let finished_at = now_ms();
            entry.record.status = status;
            entry.record.finished_at = Some(finished_at);
            match &outcome {
                JobOutcome::Succeeded(value) => entry.record.final_value = Some(value.clone()),
                JobOutcome::Failed(error) => entry.record.error = Some(error.clone()),
                JobOutcome::Cancelled => {}
            }
            entry.settled_at = Some(Instant::now());

            for (_, tx) in entry.subscribers.drain(..) {
                let _ = tx.send(JobSignal::Terminal(outcome.clone()));
            }

            let kind = entry.record.kind.as_str();
            JOBS_ACTIVE.dec();
            JOBS_FINISHED
                .with_label_values(&[kind, status.as_str()])
                .inc();
            JOB_DURATION
                .with_label_values(&[kind])
                .observe((finished_at - entry.record.started_at).max(0) as f64 / 1000.0);

            info!(
                job_id = %entry.record.id,
                kind = kind,
                status = %status,
                events = entry.record.history.len(),
                "job settled"
            );
        });
    }

    fn unsubscribe(&self, id: &str, subscriber_id: u64) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.subscribers.retain(|(sid, _)| *sid != subscriber_id);
        }
    }

    /// Run `f` against a job that exists and has not expired
    fn with_live_job(&self, id: &str, op: &str, f: impl FnOnce(&mut JobEntry)) {
        let mut jobs = self.write();
        match jobs.get_mut(id).filter(|entry| !entry.is_expired(self.ttl)) {
            Some(entry) => f(entry),
            None => debug!(job_id = id, op, "job not found, ignoring"),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live subscription to one job
///
/// Yields every progress event recorded after registration, then the
/// terminal signal. `None` means the job was removed from the store.
pub struct Subscription {
    job_id: JobId,
    subscriber_id: u64,
    last: Option<ProgressEvent>,
    rx: mpsc::UnboundedReceiver<JobSignal>,
    store: Weak<ProgressStore>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The job's latest event at the moment of subscribing
    pub fn last_seen(&self) -> Option<&ProgressEvent> {
        self.last.as_ref()
    }

    pub async fn recv(&mut self) -> Option<JobSignal> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(&self.job_id, self.subscriber_id);
        }
    }
}
