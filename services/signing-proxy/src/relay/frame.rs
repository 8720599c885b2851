//! NDJSON stream frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One line of the caller-facing stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Session metadata; first frame, at most once
    Meta {
        /// Resolved session id
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// One upstream chunk, verbatim
    Delta {
        /// Chunk text
        delta: String,
    },
    /// Successful end of stream
    Done {
        /// Resolved session id
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Number of deltas relayed
        deltas: u64,
    },
    /// Failure before any delta was relayed
    Error {
        /// Sanitized message
        message: String,
    },
}

impl StreamFrame {
    /// Frame name used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this frame ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Serializes the frame as one newline-terminated JSON line.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}
