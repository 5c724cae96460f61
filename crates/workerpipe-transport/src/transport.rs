use std::io::{Read, Write};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, warn};
use workerpipe_frame::{encode_frame, FrameReader, FrameWriter};
use workerpipe_process::{PipeCloser, WorkerPipes, WorkerProcess};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::message::{InboundMessage, MessageCodec, OutboundMessage, Request};
use crate::registry::{Delivery, Registry, WaiterToken};
use crate::{reader, relay};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type BoxedWriter = FrameWriter<Box<dyn Write + Send>>;

/// State shared between callers and the background threads.
pub(crate) struct Shared {
    /// Dispatch lock: registration, dispatch passes and broadcasts all
    /// happen under it.
    registry: Mutex<Registry>,
    /// Write mutex. `None` once stdin has been closed.
    writer: Mutex<Option<BoxedWriter>>,
    worker: Mutex<Option<WorkerProcess>>,
    /// Ends the reads the background threads are blocked in.
    closer: Mutex<Option<PipeCloser>>,
    closing: AtomicBool,
    pub(crate) codec: Arc<dyn MessageCodec>,
    shutdown_timeout: Duration,
}

impl Shared {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn dispatch(&self, message: &InboundMessage) -> usize {
        lock(&self.registry).dispatch(message)
    }

    fn register(&self, id: u32) -> Result<(WaiterToken, Receiver<Delivery>)> {
        lock(&self.registry).register(id)
    }

    fn unregister(&self, token: WaiterToken) -> bool {
        lock(&self.registry).unregister(token)
    }

    /// Write one pre-encoded frame while holding the write mutex.
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        let result = writer.write_encoded(frame);
        if self.is_closing() {
            // Shutdown could not take the writer while this write held it.
            guard.take();
        }
        result.map_err(|err| {
            if self.is_closing() {
                TransportError::Closed
            } else {
                err.into()
            }
        })
    }

    /// Deliver `err` to every pending request, then shut down.
    ///
    /// Called by the background threads on stream or decode failures. A
    /// no-op once shutdown has started.
    pub(crate) fn fail(&self, err: TransportError) {
        let failed = {
            let mut registry = lock(&self.registry);
            if self.is_closing() {
                return;
            }
            let failed = registry.broadcast(&err);
            registry.close();
            failed
        };
        warn!(error = %err, pending = failed, "transport failed");
        self.shutdown();
    }

    /// Close all three streams, drop waiters, and reap the worker.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let dropped = lock(&self.registry).close();

        // A writer blocked on a full pipe keeps the lock; it drops the
        // writer itself once its write returns.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if let Some(closer) = lock(&self.closer).take() {
            if let Err(err) = closer() {
                debug!(error = %err, "failed to close worker streams");
            }
        }

        let worker = lock(&self.worker).take();
        match worker {
            Some(mut worker) => match worker.terminate(self.shutdown_timeout) {
                Ok(status) => info!(pid = worker.id(), %status, dropped, "transport closed"),
                Err(err) => warn!(pid = worker.id(), error = %err, "failed to reap worker"),
            },
            None => info!(dropped, "transport closed"),
        }
    }
}

/// Bidirectional framed message channel to one worker process.
///
/// `send` may be called from many threads at once through a shared
/// reference. Dropping the transport closes it.
pub struct Transport {
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
    worker_id: Option<u32>,
}

impl Transport {
    /// Launch `command` as the worker with default configuration.
    pub fn spawn(command: &mut Command) -> Result<Self> {
        Self::spawn_with_config(command, TransportConfig::default())
    }

    /// Launch `command` as the worker.
    pub fn spawn_with_config(command: &mut Command, config: TransportConfig) -> Result<Self> {
        let (worker, pipes) = WorkerProcess::spawn(command)?;
        Self::start(pipes, Some(worker), config)
    }

    /// Run over streams that are already connected to a worker.
    pub fn open(pipes: WorkerPipes) -> Result<Self> {
        Self::open_with_config(pipes, TransportConfig::default())
    }

    /// Run over already-connected streams with explicit configuration.
    pub fn open_with_config(pipes: WorkerPipes, config: TransportConfig) -> Result<Self> {
        Self::start(pipes, None, config)
    }

    fn start(
        pipes: WorkerPipes,
        worker: Option<WorkerProcess>,
        config: TransportConfig,
    ) -> Result<Self> {
        let WorkerPipes {
            stdin,
            stdout,
            stderr,
            closer,
        } = pipes;
        let worker_id = worker.as_ref().map(WorkerProcess::id);

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            writer: Mutex::new(Some(FrameWriter::with_config(stdin, config.frame.clone()))),
            worker: Mutex::new(worker),
            closer: Mutex::new(closer),
            closing: AtomicBool::new(false),
            codec: config.codec,
            shutdown_timeout: config.shutdown_timeout,
        });

        let transport = Self {
            shared: Arc::clone(&shared),
            request_timeout: config.request_timeout,
            worker_id,
        };

        let frames: FrameReader<Box<dyn Read + Send>> =
            FrameReader::with_config(stdout, config.frame);
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("workerpipe-reader".to_string())
            .spawn(move || reader::run(reader_shared, frames))
            .map_err(|source| TransportError::Thread {
                name: "reader",
                source: Arc::new(source),
            })?;

        if let Some(stderr) = stderr {
            let relay_shared = Arc::clone(&shared);
            let sink = config.diagnostics;
            thread::Builder::new()
                .name("workerpipe-stderr".to_string())
                .spawn(move || relay::run(relay_shared, stderr, sink))
                .map_err(|source| TransportError::Thread {
                    name: "stderr relay",
                    source: Arc::new(source),
                })?;
        }

        debug!(worker = ?worker_id, "transport started");
        Ok(transport)
    }

    /// Send a typed request and block until the reply correlated by `id`.
    ///
    /// `id` must be unique among requests currently in flight and must not
    /// be [`PROTOCOL_ERROR_ID`](crate::PROTOCOL_ERROR_ID).
    pub fn send<R: Request>(&self, request: &R, id: u32) -> Result<InboundMessage> {
        let message = OutboundMessage::from_request(request)?;
        self.send_message(&message, id)
    }

    /// Send a pre-built envelope and block until the reply correlated by `id`.
    pub fn send_message(&self, message: &OutboundMessage, id: u32) -> Result<InboundMessage> {
        if self.shared.is_closing() {
            return Err(TransportError::Closed);
        }

        // Encode outside every lock.
        let payload = self.shared.codec.encode(message)?;
        let mut frame = BytesMut::with_capacity(payload.len() + 10);
        encode_frame(&payload, &mut frame);

        // Registered before the frame exists on the pipe, so no reply can
        // be dispatched while its waiter is absent.
        let (token, slot) = self.shared.register(id)?;

        if let Err(err) = self.shared.write_frame(&frame) {
            self.shared.unregister(token);
            return Err(err);
        }
        debug!(id, kind = %message.kind, size = payload.len(), "request written");

        match self.request_timeout {
            None => slot.recv().map_err(|_| TransportError::Closed)?,
            Some(timeout) => match slot.recv_timeout(timeout) {
                Ok(delivery) => delivery,
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.unregister(token) {
                        return Err(TransportError::Timeout(timeout));
                    }
                    // Delivered between the timeout and the unregister.
                    match slot.try_recv() {
                        Ok(delivery) => delivery,
                        Err(TryRecvError::Empty) => return Err(TransportError::Timeout(timeout)),
                        Err(TryRecvError::Disconnected) => return Err(TransportError::Closed),
                    }
                }
            },
        }
    }

    /// Shut the transport down.
    ///
    /// Pending requests return [`TransportError::Closed`]. The worker gets
    /// the configured shutdown timeout to exit after its stdin closes and is
    /// killed after that. Safe to call any number of times.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    /// Whether the transport has shut down, by `close` or by a failure.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending(&self) -> usize {
        lock(&self.shared.registry).len()
    }

    /// OS process id of the worker, when this transport launched it.
    pub fn worker_id(&self) -> Option<u32> {
        self.worker_id
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("worker_id", &self.worker_id)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}
