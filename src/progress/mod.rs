//! Progress reporting for background jobs
//!
//! - `reporter` - rate-limited streaming of job progress to a message sink
//! - `format` - one-line summaries of progress events
//! - `output` - `ToolOutput`, the value-or-job result of a tool call

pub mod format;
pub mod output;
pub mod reporter;

pub use format::format_progress;
pub use output::ToolOutput;
pub use reporter::{
    ConsoleSink, MessageSink, ProgressReporter, ReportError, ReporterOptions, DEFAULT_INTERVAL,
    MIN_INTERVAL,
};
