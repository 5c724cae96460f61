use std::io::ErrorKind;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};
use crate::pipes::WorkerPipes;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A spawned worker process.
///
/// Owns the child handle only; the stdio streams are handed out separately
/// as [`WorkerPipes`] so they can move onto dedicated threads.
pub struct WorkerProcess {
    child: Child,
    program: String,
}

impl WorkerProcess {
    /// Spawn `command` with all three stdio streams piped.
    ///
    /// Any stdio configuration already present on `command` is overridden.
    pub fn spawn(command: &mut Command) -> Result<(Self, WorkerPipes)> {
        let program = command.get_program().to_string_lossy().into_owned();

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pipes = match WorkerPipes::from_child(&mut child) {
            Ok(pipes) => pipes,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        info!(pid = child.id(), program = %program, "spawned worker");
        Ok((Self { child, program }, pipes))
    }

    /// OS process id of the worker.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Program name the worker was launched from.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait up to `timeout` for the worker to exit on its own.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Kill the worker. Succeeds if it has already exited.
    pub fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Give the worker `grace` to exit, then kill it, and reap it either way.
    pub fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.wait_timeout(grace)? {
            debug!(pid = self.id(), %status, "worker exited");
            return Ok(status);
        }

        warn!(pid = self.id(), ?grace, "worker did not exit in time; killing");
        self.kill()?;
        Ok(self.child.wait()?)
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.child.id())
            .field("program", &self.program)
            .finish()
    }
}
