use std::sync::Arc;
use std::time::Duration;

use workerpipe_frame::FrameError;
use workerpipe_process::ProcessError;

/// Errors produced while encoding or decoding message envelopes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload decoded but is not a usable envelope.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Errors surfaced by [`Transport`](crate::Transport) operations.
///
/// `Clone` because a single stream failure or protocol error is delivered
/// to every pending request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// A worker pipe closed or broke, or a frame could not be transferred.
    #[error("stream failure: {0}")]
    Stream(Arc<FrameError>),

    /// The worker reported a session-level failure (sentinel correlation id).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(Arc<CodecError>),

    /// The worker process could not be launched.
    #[error("worker process error: {0}")]
    Process(Arc<ProcessError>),

    /// A background thread could not be started.
    #[error("failed to start {name} thread: {source}")]
    Thread {
        name: &'static str,
        source: Arc<std::io::Error>,
    },

    /// Another pending request already uses this correlation id.
    #[error("correlation id {0} is already pending")]
    DuplicateId(u32),

    /// The correlation id is reserved for protocol errors.
    #[error("correlation id {0} is reserved")]
    ReservedId(u32),

    /// No reply arrived within the configured request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        Self::Stream(Arc::new(err))
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        Self::Codec(Arc::new(err))
    }
}

impl From<ProcessError> for TransportError {
    fn from(err: ProcessError) -> Self {
        Self::Process(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
