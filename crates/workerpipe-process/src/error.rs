/// Errors that can occur while launching or managing a worker process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The worker binary could not be started.
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// A stdio pipe was not captured when the worker was spawned.
    #[error("worker {0} pipe was not captured")]
    MissingPipe(&'static str),

    /// An I/O error occurred while signalling or reaping the worker.
    #[error("worker process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
