//! Worker subprocess plumbing.
//!
//! This is the lowest layer of workerpipe: it launches a worker with piped
//! stdio and hands the three byte streams upward as a [`WorkerPipes`]
//! bundle. Everything else builds on top of these streams.

pub mod error;
pub mod pipes;
pub mod process;

pub use error::{ProcessError, Result};
pub use pipes::{PipeCloser, WorkerPipes};
pub use process::WorkerProcess;
