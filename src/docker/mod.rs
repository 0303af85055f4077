//! Docker Engine integration
//!
//! - `client` - Engine API client over the unix socket or TCP
//! - `engine` - the `ContainerEngine` trait the producers are written against
//! - `runtime` - job-producing operations (`pull_image`, `exec_container`)
//! - `pull` - folding of pull frames into progress
//! - `exec` - exec streaming, timeout and exit code retrieval
//! - `demux` - stdout/stderr frame demultiplexing

pub mod client;
pub mod config;
pub mod demux;
pub mod engine;
pub mod error;
pub mod exec;
pub mod models;
pub mod pull;
pub mod runtime;

pub use client::DockerClient;
pub use config::{DockerConfig, DockerHost};
pub use engine::{ByteStream, ContainerEngine, PullStream};
pub use error::EngineError;
pub use exec::ExecOutput;
pub use models::RegistryAuth;
pub use pull::{PullOutcome, PullResult};
pub use runtime::RuntimeAdapter;
