//! The seam between the runtime adapter and a container engine
//!
//! `DockerClient` is the production implementation. Tests plug in
//! in-memory engines that replay canned frames.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;
use hyper::body::Bytes;

use super::error::EngineError;
use super::models::{ExecInspect, PullFrame, RegistryAuth};

/// Decoded pull progress frames
pub type PullStream = Pin<Box<dyn Stream<Item = Result<PullFrame, EngineError>> + Send>>;

/// Raw bytes of an attached exec (multiplexed stdout/stderr)
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

/// Operations the job producers need from a container engine
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start pulling `reference` and stream its progress frames
    async fn pull_image(
        &self,
        reference: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, EngineError>;

    /// Create an exec instance in `container`, returning its id
    async fn create_exec(&self, container: &str, cmd: &[String]) -> Result<String, EngineError>;

    /// Start an exec and attach to its output
    ///
    /// Dropping the returned stream closes the connection.
    async fn start_exec(&self, exec_id: &str) -> Result<ByteStream, EngineError>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect, EngineError>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<(), EngineError>;
}
