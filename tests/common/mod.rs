//! In-memory container engine for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use hyper::body::Bytes;

use dockerina::docker::engine::{ByteStream, ContainerEngine, PullStream};
use dockerina::docker::models::{ExecInspect, PullFrame, RegistryAuth};
use dockerina::docker::EngineError;
use dockerina::jobs::{JobSignal, ProgressStore, Subscription};

/// Replays canned pull frames and exec output
#[derive(Default)]
pub struct FakeEngine {
    /// Items yielded by the next `pull_image`
    pub pull_frames: Mutex<Vec<Result<PullFrame, EngineError>>>,
    /// Returned by `pull_image` instead of a stream
    pub pull_error: Mutex<Option<EngineError>>,
    /// Raw chunks of the attached exec stream
    pub exec_chunks: Vec<Vec<u8>>,
    /// Keep the exec stream open forever after the chunks
    pub exec_hangs: bool,
    /// What `inspect_exec` reports
    pub inspect: ExecInspect,
    pub inspect_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn pulling(frames: Vec<PullFrame>) -> Self {
        Self {
            pull_frames: Mutex::new(frames.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    pub fn executing(chunks: Vec<Vec<u8>>, exit_code: Option<i64>) -> Self {
        Self {
            exec_chunks: chunks,
            inspect: ExecInspect {
                exit_code,
                running: false,
            },
            ..Default::default()
        }
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull_image(
        &self,
        _reference: &str,
        _auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, EngineError> {
        if let Some(e) = self.pull_error.lock().unwrap().take() {
            return Err(e);
        }
        let frames = std::mem::take(&mut *self.pull_frames.lock().unwrap());
        Ok(Box::pin(stream::iter(frames)))
    }

    async fn create_exec(&self, _container: &str, _cmd: &[String]) -> Result<String, EngineError> {
        Ok("exec-1".to_string())
    }

    async fn start_exec(&self, _exec_id: &str) -> Result<ByteStream, EngineError> {
        let chunks: Vec<Result<Bytes, EngineError>> = self
            .exec_chunks
            .iter()
            .map(|chunk| Ok(Bytes::from(chunk.clone())))
            .collect();

        let stream: ByteStream = if self.exec_hangs {
            Box::pin(stream::iter(chunks).chain(stream::pending()))
        } else {
            Box::pin(stream::iter(chunks))
        };
        Ok(stream)
    }

    async fn inspect_exec(&self, _exec_id: &str) -> Result<ExecInspect, EngineError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inspect.clone())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// One multiplexed output frame: 8-byte header plus payload
pub fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Wait until the reporter (or anyone) has subscribed to `id`
pub async fn wait_for_subscriber(store: &Arc<ProgressStore>, id: &str) {
    while store.subscriber_count(id) == 0 {
        tokio::task::yield_now().await;
    }
}

/// Collect signals up to and including the terminal one
pub async fn drain(mut subscription: Subscription) -> Vec<JobSignal> {
    let mut signals = Vec::new();
    while let Some(signal) = subscription.recv().await {
        let terminal = matches!(signal, JobSignal::Terminal(_));
        signals.push(signal);
        if terminal {
            break;
        }
    }
    signals
}
