use std::io::{self, Read, Write};
#[cfg(unix)]
use std::net::Shutdown;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::process::Child;

use crate::error::{ProcessError, Result};

/// Closes the read halves of a bundle from outside the threads that own them.
pub type PipeCloser = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// The three byte streams of a worker process.
///
/// `stdin` is written by the host and read by the worker, `stdout` carries
/// framed replies back, and `stderr` carries free-form diagnostics. A bundle
/// without `stderr` is valid for workers that have no diagnostic stream.
///
/// Reads on `stdout` and `stderr` block on dedicated threads, so dropping
/// the host's other handles cannot end them. `closer`, when present, shuts
/// the streams down and wakes those reads with end-of-stream. Child pipes
/// need none: they reach end-of-stream when the worker exits.
pub struct WorkerPipes {
    pub stdin: Box<dyn Write + Send>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Option<Box<dyn Read + Send>>,
    pub closer: Option<PipeCloser>,
}

impl WorkerPipes {
    /// Bundle arbitrary streams, e.g. socket pairs standing in for a worker.
    pub fn new(
        stdin: impl Write + Send + 'static,
        stdout: impl Read + Send + 'static,
        stderr: impl Read + Send + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
            closer: None,
        }
    }

    /// Bundle a request/response stream pair with no diagnostic stream.
    pub fn without_stderr(
        stdin: impl Write + Send + 'static,
        stdout: impl Read + Send + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
            closer: None,
        }
    }

    /// Take the piped stdio handles out of a spawned child.
    ///
    /// Fails if any of the three streams was not configured as
    /// `Stdio::piped()`.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        Ok(Self::new(stdin, stdout, stderr))
    }

    /// Bundle connected Unix sockets, with a closer that shuts all three
    /// down.
    #[cfg(unix)]
    pub fn from_unix_streams(
        stdin: UnixStream,
        stdout: UnixStream,
        stderr: UnixStream,
    ) -> io::Result<Self> {
        let handles = [stdin.try_clone()?, stdout.try_clone()?, stderr.try_clone()?];
        Ok(Self::new(stdin, stdout, stderr).with_closer(move || {
            for handle in &handles {
                match handle.shutdown(Shutdown::Both) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        }))
    }

    /// Attach a closer for streams that do not end on their own.
    pub fn with_closer(
        mut self,
        closer: impl FnOnce() -> io::Result<()> + Send + 'static,
    ) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }
}

impl std::fmt::Debug for WorkerPipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPipes")
            .field("stderr", &self.stderr.is_some())
            .field("closer", &self.closer.is_some())
            .finish_non_exhaustive()
    }
}
