//! Dockerina - background Docker jobs with rate-limited progress reporting
//!
//! Long-running Docker operations (image pulls, command execution) are
//! turned into jobs. The caller gets a job handle back immediately and a
//! reporter streams throttled progress lines until the job settles.
//!
//! # Modules
//!
//! - `jobs` - in-memory job store with per-job subscriptions
//! - `docker` - Engine API client and the job-producing runtime adapter
//! - `progress` - progress reporter, formatting and `ToolOutput`
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dockerina::{ConsoleSink, DockerClient, DockerConfig, ProgressReporter, ProgressStore,
//!     ReporterOptions, RuntimeAdapter};
//!
//! let config = DockerConfig::from_env()?;
//! let store = Arc::new(ProgressStore::default());
//! let runtime = RuntimeAdapter::new(
//!     Arc::new(DockerClient::from_config(&config)),
//!     store.clone(),
//!     config.exec_timeout,
//! );
//!
//! let job = runtime.pull_image("alpine:3.19", None);
//! let value = ProgressReporter::new(store)
//!     .stream_progress(&job, ReporterOptions::default(), &ConsoleSink)
//!     .await?;
//! ```

pub mod docker;
pub mod jobs;
pub mod metrics;
pub mod progress;
pub mod tracing;

pub use docker::{
    ContainerEngine, DockerClient, DockerConfig, EngineError, ExecOutput, RuntimeAdapter,
};
pub use jobs::{JobKind, JobRef, JobStatus, ProgressStore, StoreError};
pub use progress::{ConsoleSink, ProgressReporter, ReportError, ReporterOptions, ToolOutput};
