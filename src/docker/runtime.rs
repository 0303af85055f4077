//! Runtime Adapter - job-producing Docker operations
//!
//! Pulls always run as background jobs: the caller gets a `JobRef` back at
//! once and the spawned task records every engine frame in the store.
//! Execs can run inline (`exec_container`) or as a tracked job.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use super::engine::ContainerEngine;
use super::error::EngineError;
use super::exec::{run_exec, ExecOutput};
use super::models::RegistryAuth;
use super::pull::PullTracker;
use crate::jobs::{
    JobError, JobId, JobKind, JobMeta, JobRef, ProgressDetail, ProgressEvent, ProgressStore,
};
use crate::metrics::PULL_FRAMES;

/// Bridges engine streams into the progress store
#[derive(Clone)]
pub struct RuntimeAdapter {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<ProgressStore>,
    exec_timeout: Duration,
}

impl RuntimeAdapter {
    /// Create an adapter
    ///
    /// # Arguments
    /// * `engine` - Container engine (a `DockerClient` in production)
    /// * `store` - Shared job store the background tasks write to
    /// * `exec_timeout` - Upper bound on a single exec stream
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<ProgressStore>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            exec_timeout,
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn exec_timeout(&self) -> Duration {
        self.exec_timeout
    }

    /// Start pulling `reference` in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn pull_image(&self, reference: &str, auth: Option<RegistryAuth>) -> JobRef {
        let mut meta = JobMeta::new();
        meta.insert("ref".to_string(), json!(reference));
        let job = self.store.create_job(JobKind::ImagePull, meta);

        let span = info_span!("image_pull", job_id = %job.id, image = %reference);
        tokio::spawn(
            drive_pull(
                self.engine.clone(),
                self.store.clone(),
                job.id.clone(),
                reference.to_string(),
                auth,
            )
            .instrument(span),
        );

        job.job_ref()
    }

    /// Run a command and wait for its output
    pub async fn exec_container(
        &self,
        container: &str,
        cmd: &[String],
    ) -> Result<ExecOutput, EngineError> {
        let span = info_span!("exec", container = %container);
        run_exec(
            self.engine.as_ref(),
            container,
            cmd,
            self.exec_timeout,
            |_| {},
        )
        .instrument(span)
        .await
    }

    /// Run a command as a `docker.exec` job, streaming output progress
    ///
    /// Must be called from within a tokio runtime.
    pub fn exec_container_tracked(&self, container: &str, cmd: Vec<String>) -> JobRef {
        let mut meta = JobMeta::new();
        meta.insert("container".to_string(), json!(container));
        meta.insert("cmd".to_string(), json!(cmd));
        let job = self.store.create_job(JobKind::Exec, meta);

        let engine = self.engine.clone();
        let store = self.store.clone();
        let job_id = job.id.clone();
        let container = container.to_string();
        let timeout = self.exec_timeout;

        let span = info_span!("exec_job", job_id = %job.id, container = %container);
        tokio::spawn(
            async move {
                store.set_running(&job_id);
                let result = run_exec(engine.as_ref(), &container, &cmd, timeout, |buffers| {
                    store.update(
                        &job_id,
                        ProgressEvent::now(None, Some(ProgressDetail::Exec(buffers.detail()))),
                    );
                })
                .await;

                match result {
                    Ok(output) => {
                        info!(exit_code = ?output.exit_code, timed_out = output.timed_out, "exec finished");
                        finish_with(&store, &job_id, &output);
                    }
                    Err(e) => {
                        warn!(error = %e, "exec failed");
                        store.fail(&job_id, e);
                    }
                }
            }
            .instrument(span),
        );

        job.job_ref()
    }
}

/// Background half of `pull_image`
async fn drive_pull(
    engine: Arc<dyn ContainerEngine>,
    store: Arc<ProgressStore>,
    job_id: JobId,
    reference: String,
    auth: Option<RegistryAuth>,
) {
    store.set_running(&job_id);

    let mut frames = match engine.pull_image(&reference, auth.as_ref()).await {
        Ok(frames) => frames,
        Err(e) => {
            warn!(error = %e, "pull could not start");
            store.fail(&job_id, e);
            return;
        }
    };

    let mut tracker = PullTracker::new(&reference);
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "pull stream failed");
                store.fail(&job_id, e);
                return;
            }
        };

        if let Some(message) = frame.error_message() {
            warn!(error = %message, "engine reported pull error");
            store.fail(&job_id, JobError::new(message).with_name("PullError"));
            return;
        }

        PULL_FRAMES.inc();
        store.update(&job_id, tracker.apply(&frame));
    }

    let outcome = tracker.outcome();
    info!(status = ?outcome.status, digest = ?outcome.digest, "pull finished");
    finish_with(&store, &job_id, &outcome);
}

fn finish_with<T: serde::Serialize>(store: &ProgressStore, job_id: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(value) => store.finish(job_id, value),
        Err(e) => store.fail(job_id, JobError::from_error(&e)),
    }
}
