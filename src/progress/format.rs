//! One-line renderings of progress events

use chrono::{Local, TimeZone};

use crate::jobs::{ExecDetail, JobStatus, ProgressDetail, ProgressEvent, PullDetail};

/// Longest tail snippet shown in an exec line
const SNIPPET_MAX_CHARS: usize = 120;

/// `"<prefix>: <HH:MM:SS> — <detail>"`
///
/// The detail is a pull summary, an exec byte count with a tail snippet,
/// or the event's message. `status` is shown when there is nothing else.
pub fn format_progress(prefix: &str, status: JobStatus, event: &ProgressEvent) -> String {
    let detail = match &event.detail {
        Some(ProgressDetail::Pull(pull)) => summarize_pull(pull),
        Some(ProgressDetail::Exec(exec)) => summarize_exec(exec),
        Some(ProgressDetail::Other(_)) | None => event
            .message
            .clone()
            .unwrap_or_else(|| status.to_string()),
    };

    format!("{}: {} — {}", prefix, local_time(event.ts), detail)
}

fn local_time(ts: i64) -> String {
    match Local.timestamp_millis_opt(ts).single() {
        Some(time) => time.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

fn summarize_pull(pull: &PullDetail) -> String {
    match pull.percent {
        Some(percent) => format!(
            "pulling '{}': {}% ({}/{} layers) — {}",
            pull.image_ref,
            percent,
            pull.completed_layers(),
            pull.layers.len(),
            pull.phase
        ),
        None => format!("pulling '{}' — {}", pull.image_ref, pull.phase),
    }
}

fn summarize_exec(exec: &ExecDetail) -> String {
    let counts = format!("stdout {} B, stderr {} B", exec.bytes_out, exec.bytes_err);

    let snippet = exec
        .stderr_tail
        .as_deref()
        .or(exec.stdout_tail.as_deref())
        .and_then(|tail| tail.lines().rev().find(|line| !line.trim().is_empty()))
        .map(|line| truncate(line.trim(), SNIPPET_MAX_CHARS));

    match snippet {
        Some(line) => format!("{} | {}", counts, line),
        None => counts,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
