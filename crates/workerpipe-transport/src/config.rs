use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use workerpipe_frame::FrameConfig;

use crate::message::{JsonCodec, MessageCodec};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the worker's stderr output is relayed.
#[derive(Clone, Default)]
pub enum Diagnostics {
    /// The host process's own stderr.
    #[default]
    Stderr,
    /// Read and drop.
    Discard,
    /// Any shared sink, e.g. a log file or an in-memory buffer.
    Writer(Arc<Mutex<dyn Write + Send>>),
}

impl Diagnostics {
    /// Wrap a writer as a diagnostics sink.
    pub fn writer(sink: impl Write + Send + 'static) -> Self {
        Self::Writer(Arc::new(Mutex::new(sink)))
    }

    /// Write one chunk of worker output and flush it.
    pub(crate) fn write(&self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::Stderr => {
                let mut stderr = io::stderr().lock();
                stderr.write_all(chunk)?;
                stderr.flush()
            }
            Self::Discard => Ok(()),
            Self::Writer(sink) => {
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                sink.write_all(chunk)?;
                sink.flush()
            }
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stderr => f.write_str("Stderr"),
            Self::Discard => f.write_str("Discard"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Transport tuning knobs.
#[derive(Clone)]
pub struct TransportConfig {
    /// Frame limits applied in both directions.
    pub frame: FrameConfig,
    /// How long `send` waits for a reply. `None` waits until the reply,
    /// a failure, or `close`.
    pub request_timeout: Option<Duration>,
    /// Grace period for the worker to exit after its stdin is closed,
    /// before it is killed.
    pub shutdown_timeout: Duration,
    /// Sink for the worker's stderr.
    pub diagnostics: Diagnostics,
    /// Envelope codec.
    pub codec: Arc<dyn MessageCodec>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            request_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            diagnostics: Diagnostics::default(),
            codec: Arc::new(JsonCodec),
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("frame", &self.frame)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}
