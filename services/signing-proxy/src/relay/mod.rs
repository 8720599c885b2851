//! Upstream invoker and streaming relay.

mod frame;
mod invoker;
mod sequencer;
mod stream;
mod utf8;

pub use frame::StreamFrame;
pub use invoker::{
    upstream_error_message, UpstreamInvoker, UpstreamResponse, RUNTIME_SESSION_HEADER,
    RUNTIME_SIGNING_SERVICE,
};
pub use sequencer::{FrameSequencer, SequenceError};
pub use stream::{relay_stream, FinishHook, RelayError, StreamOutcome, StreamSummary, PREVIEW_LIMIT};
pub use utf8::Utf8Carry;
