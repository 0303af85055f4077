//! Prometheus metrics for job tracking and Docker operations
//!
//! All collectors are registered once in the default registry.
//! `gather_text()` renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Jobs created, by kind
    pub static ref JOBS_CREATED: IntCounterVec = register_int_counter_vec!(
        "dockerina_jobs_created_total",
        "Background jobs created",
        &["kind"]
    )
    .unwrap();

    /// Jobs that reached a terminal state, by kind and status
    pub static ref JOBS_FINISHED: IntCounterVec = register_int_counter_vec!(
        "dockerina_jobs_finished_total",
        "Background jobs settled",
        &["kind", "status"]
    )
    .unwrap();

    /// Jobs not yet settled
    pub static ref JOBS_ACTIVE: IntGauge = register_int_gauge!(
        "dockerina_jobs_active",
        "Background jobs pending or running"
    )
    .unwrap();

    /// Wall time from job creation to its terminal state
    pub static ref JOB_DURATION: HistogramVec = register_histogram_vec!(
        "dockerina_job_duration_seconds",
        "Time from job creation to terminal state",
        &["kind"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]
    )
    .unwrap();

    /// Pull stream frames folded into progress events
    pub static ref PULL_FRAMES: IntCounter = register_int_counter!(
        "dockerina_pull_frames_total",
        "Image pull progress frames processed"
    )
    .unwrap();

    /// Exec streams destroyed by the timeout
    pub static ref EXEC_TIMEOUTS: IntCounter = register_int_counter!(
        "dockerina_exec_timeouts_total",
        "Exec streams cut off by the timeout"
    )
    .unwrap();

    /// Progress messages pushed to the conversation
    pub static ref PROGRESS_MESSAGES: IntCounterVec = register_int_counter_vec!(
        "dockerina_progress_messages_total",
        "Progress messages dispatched by the reporter",
        &["kind"]
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
