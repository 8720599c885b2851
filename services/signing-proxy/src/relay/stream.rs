//! Streaming relay: upstream chunks to NDJSON frames.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use super::frame::StreamFrame;
use super::invoker::UpstreamResponse;
use super::sequencer::{FrameSequencer, SequenceError};
use super::utf8::Utf8Carry;

/// Characters of relayed text kept for the audit preview.
pub const PREVIEW_LIMIT: usize = 1024;

/// Failure that aborts the response body after deltas were sent.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream read failed mid-stream
    #[error("upstream stream failed")]
    Upstream,

    /// No upstream data within the idle timeout
    #[error("upstream stream idle for {0:?}")]
    Idle(Duration),

    /// Frame ordering violated
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Frame could not be serialized
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `Done` was sent
    Completed,
    /// `Error` was sent before any delta
    Failed,
    /// Body aborted after deltas
    Aborted,
    /// Caller went away
    Cancelled,
}

impl StreamOutcome {
    /// Label for logs, metrics and audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Totals reported once per stream.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Resolved session id
    pub session_id: String,
    /// Terminal state
    pub outcome: StreamOutcome,
    /// Delta frames sent
    pub deltas: u64,
    /// Upstream bytes read
    pub bytes: u64,
    /// Time from first poll to the end of the stream
    pub duration: Duration,
    /// Leading relayed text
    pub preview: String,
    /// Whether `preview` was cut
    pub preview_truncated: bool,
}

/// Invoked exactly once when the stream ends, however it ends.
pub type FinishHook = Box<dyn FnOnce(StreamSummary) + Send + 'static>;

struct Tracker {
    hook: Option<FinishHook>,
    summary: StreamSummary,
    preview_chars: usize,
    started: Instant,
}

impl Tracker {
    fn new(session_id: String, hook: FinishHook) -> Self {
        Self {
            hook: Some(hook),
            summary: StreamSummary {
                session_id,
                outcome: StreamOutcome::Cancelled,
                deltas: 0,
                bytes: 0,
                duration: Duration::ZERO,
                preview: String::new(),
                preview_truncated: false,
            },
            preview_chars: 0,
            started: Instant::now(),
        }
    }

    fn record_chunk(&mut self, len: usize) {
        self.summary.bytes += len as u64;
    }

    fn record_delta(&mut self, text: &str) {
        self.summary.deltas += 1;
        if self.summary.preview_truncated {
            return;
        }
        for c in text.chars() {
            if self.preview_chars == PREVIEW_LIMIT {
                self.summary.preview_truncated = true;
                return;
            }
            self.summary.preview.push(c);
            self.preview_chars += 1;
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(hook) = self.hook.take() {
            hook(StreamSummary {
                outcome,
                duration: self.started.elapsed(),
                preview: std::mem::take(&mut self.summary.preview),
                ..self.summary.clone()
            });
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.hook.is_some() {
            debug!(session_id = %self.summary.session_id, "Caller disconnected, releasing upstream stream");
            self.finish(StreamOutcome::Cancelled);
        }
    }
}

fn emit(sequencer: &mut FrameSequencer, frame: &StreamFrame) -> Result<Bytes, RelayError> {
    sequencer.admit(frame)?;
    Ok(frame.encode()?)
}

/// Relays an upstream body as `Meta`, `Delta*`, then `Done` or `Error`.
///
/// Dropping the returned stream drops the upstream body and releases the
/// connection. Once a delta has been sent a failure aborts the body
/// instead of emitting `Error`.
pub fn relay_stream(
    upstream: UpstreamResponse,
    idle_timeout: Duration,
    on_finish: FinishHook,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
    async_stream::try_stream! {
        let UpstreamResponse { session_id, mut body, .. } = upstream;
        let mut tracker = Tracker::new(session_id.clone(), on_finish);
        let mut sequencer = FrameSequencer::new();
        let mut carry = Utf8Carry::default();

        yield emit(&mut sequencer, &StreamFrame::Meta { session_id: session_id.clone() })?;

        let failure = loop {
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    tracker.record_chunk(chunk.len());
                    let text = carry.push(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    tracker.record_delta(&text);
                    yield emit(&mut sequencer, &StreamFrame::Delta { delta: text })?;
                }
                Ok(None) => break None,
                Ok(Some(Err(err))) => {
                    warn!(error = %err.without_url(), "Upstream stream read failed");
                    break Some(RelayError::Upstream);
                }
                Err(_) => {
                    warn!(timeout_secs = idle_timeout.as_secs(), "Upstream stream idle timeout");
                    break Some(RelayError::Idle(idle_timeout));
                }
            }
        };

        match failure {
            None => {
                if let Some(rest) = carry.finish() {
                    tracker.record_delta(&rest);
                    yield emit(&mut sequencer, &StreamFrame::Delta { delta: rest })?;
                }
                let deltas = sequencer.deltas();
                yield emit(&mut sequencer, &StreamFrame::Done { session_id, deltas })?;
                tracker.finish(StreamOutcome::Completed);
            }
            Some(err) if sequencer.deltas() == 0 => {
                let message = match err {
                    RelayError::Idle(_) => "Upstream stream timed out",
                    _ => "Upstream stream failed",
                };
                yield emit(&mut sequencer, &StreamFrame::Error { message: message.to_string() })?;
                tracker.finish(StreamOutcome::Failed);
            }
            Some(err) => {
                tracker.finish(StreamOutcome::Aborted);
                Err::<(), _>(err)?;
            }
        }
    }
}
