//! Frame ordering: `Meta? Delta* (Done | Error)`, with `Error` only
//! before the first `Delta`.

use thiserror::Error;

use super::frame::StreamFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    Meta,
    Streaming,
    Terminated,
}

/// A frame that would break the ordering invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{frame} frame not allowed after {after}")]
pub struct SequenceError {
    frame: &'static str,
    after: &'static str,
}

/// Tracks the frames of one response stream.
#[derive(Debug)]
pub struct FrameSequencer {
    stage: Stage,
    deltas: u64,
}

impl FrameSequencer {
    /// A sequencer for a fresh stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            deltas: 0,
        }
    }

    /// Admits `frame` if it keeps the stream well-ordered.
    pub fn admit(&mut self, frame: &StreamFrame) -> Result<(), SequenceError> {
        let next = match (self.stage, frame) {
            (Stage::Start, StreamFrame::Meta { .. }) => Stage::Meta,
            (Stage::Start | Stage::Meta | Stage::Streaming, StreamFrame::Delta { .. }) => {
                self.deltas += 1;
                Stage::Streaming
            }
            (Stage::Start | Stage::Meta | Stage::Streaming, StreamFrame::Done { .. })
            | (Stage::Start | Stage::Meta, StreamFrame::Error { .. }) => Stage::Terminated,
            (stage, frame) => {
                return Err(SequenceError {
                    frame: frame.kind(),
                    after: stage.label(),
                })
            }
        };
        self.stage = next;
        Ok(())
    }

    /// Deltas admitted so far.
    #[must_use]
    pub fn deltas(&self) -> u64 {
        self.deltas
    }

    /// Whether a terminal frame was admitted.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.stage == Stage::Terminated
    }
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage {
    const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Meta => "meta",
            Self::Streaming => "delta",
            Self::Terminated => "terminal frame",
        }
    }
}
