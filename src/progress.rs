//! Harvest progress reporting and cancellation.
//!
//! The pipeline emits [`ProgressEvent`]s at every major step so a caller —
//! the CLI in batch mode, or an interactive monitoring view — can follow a
//! run. Events go through a [`ProgressSink`]; implementations print to
//! **stderr** (human or JSON lines, keeping stdout parseable) or forward
//! into a bounded channel for long-lived consumers. The channel form is
//! also where cancellation naturally lives: a consumer that goes away can
//! trip the [`CancelToken`] it shares with the run.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single progress event for one harvest run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A named step started or produced a human-readable status.
    Status { stage: String, message: String },
    /// Terminal result payload for a successful run.
    Result {
        articles_processed: usize,
        total_chars: usize,
        summary_length: usize,
        chunks_created: usize,
        preview: String,
    },
    /// The run finished successfully.
    Done,
    /// The run ended without producing usable output.
    Error { message: String },
}

/// Reports harvest progress. Implementations must not fail the run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Status { stage, message } => {
                format!("harvest  {}  {}\n", stage, message)
            }
            ProgressEvent::Result {
                articles_processed,
                total_chars,
                summary_length,
                chunks_created,
                ..
            } => format!(
                "harvest  result  {} articles, {} chars, summary {} chars, {} chunks\n",
                articles_processed, total_chars, summary_length, chunks_created
            ),
            ProgressEvent::Done => "harvest  done\n".to_string(),
            ProgressEvent::Error { message } => format!("harvest  error  {}\n", message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Status { stage, message } => serde_json::json!({
                "event": "status",
                "stage": stage,
                "message": message,
            }),
            ProgressEvent::Result {
                articles_processed,
                total_chars,
                summary_length,
                chunks_created,
                preview,
            } => serde_json::json!({
                "event": "result",
                "articlesProcessed": articles_processed,
                "totalChars": total_chars,
                "summaryLength": summary_length,
                "chunksCreated": chunks_created,
                "preview": preview,
            }),
            ProgressEvent::Done => serde_json::json!({ "event": "done" }),
            ProgressEvent::Error { message } => serde_json::json!({
                "event": "error",
                "message": message,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// Forward events into a bounded channel for a long-lived consumer.
///
/// A full or closed channel drops the event rather than blocking the run.
pub struct ChannelProgress {
    sender: tokio::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = self.sender.try_send(event);
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a sink for this mode. Caller passes it to the coordinator.
    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Caller-driven cancellation, honored at stage boundaries.
///
/// Cloning shares the flag; any clone can cancel.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
