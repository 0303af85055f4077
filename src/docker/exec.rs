//! Command execution inside a running container
//!
//! ```text
//! create_exec ──► start_exec ──► demux frames ──► stream ends / timeout
//!                                                        │
//!                            inspect_exec (≤10 × 50ms) ◄─┘
//! ```
//!
//! The engine can close the output stream a moment before the exit code
//! shows up in `inspect`, so the code is polled briefly. If the timeout
//! cut the stream off, the exit code is reported as unknown.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::demux::{Demuxer, OutputFrame, OutputStream};
use super::engine::ContainerEngine;
use super::error::EngineError;
use crate::jobs::ExecDetail;
use crate::metrics::EXEC_TIMEOUTS;

/// Attempts at reading the exit code after the stream ends
pub const EXIT_CODE_POLL_ATTEMPTS: u32 = 10;
/// Pause between exit code attempts
pub const EXIT_CODE_POLL_DELAY: Duration = Duration::from_millis(50);
/// Lines kept in the rolling output tails
pub const TAIL_LINES: usize = 25;
/// Hard cap on a tail, in characters
pub const TAIL_MAX_CHARS: usize = 1024;

/// Result of running a command in a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// `None` when the exit code could not be determined
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    /// The stream was destroyed by the exec timeout
    pub timed_out: bool,
}

/// stdout/stderr accumulated so far
#[derive(Debug, Default, Clone)]
pub struct ExecBuffers {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ExecBuffers {
    pub fn push(&mut self, frame: &OutputFrame) {
        match frame.stream {
            OutputStream::Stdout => self.stdout.extend_from_slice(&frame.payload),
            OutputStream::Stderr => self.stderr.extend_from_slice(&frame.payload),
        }
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Byte counts plus rolling tails, as a progress detail
    pub fn detail(&self) -> ExecDetail {
        ExecDetail {
            bytes_out: self.stdout.len() as u64,
            bytes_err: self.stderr.len() as u64,
            stdout_tail: tail_text(&self.stdout, TAIL_LINES, TAIL_MAX_CHARS),
            stderr_tail: tail_text(&self.stderr, TAIL_LINES, TAIL_MAX_CHARS),
        }
    }

    fn into_output(self, exit_code: Option<i64>, timed_out: bool) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            timed_out,
        }
    }
}

/// Last `lines` lines of `bytes`, keeping at most `max_chars` of the end
pub fn tail_text(bytes: &[u8], lines: usize, max_chars: usize) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    // a char is at most 4 bytes, so this window always covers max_chars
    let window = bytes.len().saturating_sub(max_chars * 4);
    let text = String::from_utf8_lossy(&bytes[window..]);
    let text = text.trim_end_matches('\n');

    let start = text
        .rmatch_indices('\n')
        .nth(lines.saturating_sub(1))
        .map(|(i, _)| i + 1)
        .unwrap_or(0);
    let tail = &text[start..];

    let count = tail.chars().count();
    let tail: String = if count > max_chars {
        tail.chars().skip(count - max_chars).collect()
    } else {
        tail.to_string()
    };
    Some(tail)
}

/// Run `cmd` in `container`, calling `on_output` after every read that
/// completed at least one frame
///
/// The stream is dropped (closing the connection) once `timeout` passes;
/// whatever was buffered by then is returned with `timed_out` set.
pub async fn run_exec<F>(
    engine: &dyn ContainerEngine,
    container: &str,
    cmd: &[String],
    timeout: Duration,
    mut on_output: F,
) -> Result<ExecOutput, EngineError>
where
    F: FnMut(&ExecBuffers) + Send,
{
    let exec_id = engine.create_exec(container, cmd).await?;
    let mut stream = engine.start_exec(&exec_id).await?;
    debug!(exec_id = %exec_id, container, "exec started");

    let mut demux = Demuxer::new();
    let mut buffers = ExecBuffers::default();

    let drained = tokio::time::timeout(timeout, async {
        while let Some(chunk) = stream.next().await {
            let frames = demux.push(&chunk?);
            if frames.is_empty() {
                continue;
            }
            for frame in &frames {
                buffers.push(frame);
            }
            on_output(&buffers);
        }
        Ok::<(), EngineError>(())
    })
    .await;
    drop(stream);

    let timed_out = match drained {
        Ok(Ok(())) => false,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            EXEC_TIMEOUTS.inc();
            warn!(
                exec_id = %exec_id,
                container,
                timeout_ms = timeout.as_millis() as u64,
                "exec timed out, stream destroyed"
            );
            true
        }
    };

    let truncated = demux.finish();
    if truncated > 0 {
        debug!(exec_id = %exec_id, bytes = truncated, "exec stream ended mid-frame");
    }

    let exit_code = if timed_out {
        None
    } else {
        poll_exit_code(engine, &exec_id).await
    };

    Ok(buffers.into_output(exit_code, timed_out))
}

/// Read the exit code, retrying while the engine catches up
async fn poll_exit_code(engine: &dyn ContainerEngine, exec_id: &str) -> Option<i64> {
    for attempt in 0..EXIT_CODE_POLL_ATTEMPTS {
        match engine.inspect_exec(exec_id).await {
            Ok(inspect) => {
                if let Some(code) = inspect.settled_exit_code() {
                    return Some(code);
                }
            }
            Err(e) => debug!(exec_id, attempt, error = %e, "exec inspect failed"),
        }

        if attempt + 1 < EXIT_CODE_POLL_ATTEMPTS {
            tokio::time::sleep(EXIT_CODE_POLL_DELAY).await;
        }
    }

    warn!(exec_id, "exit code not available, reporting unknown");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::body::Bytes;

    #[test]
    fn test_tail_keeps_last_lines() {
        let text: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let tail = tail_text(text.as_bytes(), 25, 1024).unwrap();

        assert!(tail.starts_with("line 6\n"));
        assert!(tail.ends_with("line 30"));
        assert_eq!(tail.lines().count(), 25);
    }

    #[test]
    fn test_tail_caps_characters() {
        let text = "x".repeat(5000);
        let tail = tail_text(text.as_bytes(), 25, 1024).unwrap();
        assert_eq!(tail.len(), 1024);
    }

    #[test]
    fn test_tail_of_nothing() {
        assert_eq!(tail_text(b"", 25, 1024), None);
        assert_eq!(tail_text(b"one line", 25, 1024).as_deref(), Some("one line"));
    }

    #[test]
    fn test_buffers_detail() {
        let mut buffers = ExecBuffers::default();
        buffers.push(&OutputFrame {
            stream: OutputStream::Stdout,
            payload: Bytes::from_static(b"hello\n"),
        });
        buffers.push(&OutputFrame {
            stream: OutputStream::Stderr,
            payload: Bytes::from_static(b"warn\n"),
        });

        let detail = buffers.detail();
        assert_eq!(detail.bytes_out, 6);
        assert_eq!(detail.bytes_err, 5);
        assert_eq!(detail.stdout_tail.as_deref(), Some("hello"));
        assert_eq!(detail.stderr_tail.as_deref(), Some("warn"));
    }

    #[test]
    fn test_output_serializes_unknown_exit_code_as_null() {
        let output = ExecBuffers::default().into_output(None, true);
        let json = serde_json::to_value(&output).unwrap();
        assert!(json["exit_code"].is_null());
        assert_eq!(json["timed_out"], true);
    }
}
