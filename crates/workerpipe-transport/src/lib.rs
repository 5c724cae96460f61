//! Request/response correlation over a worker process's stdio pipes.
//!
//! Many threads call [`Transport::send`] at once; each blocks until the
//! worker's reply carrying its correlation id comes back. A single reader
//! thread demultiplexes replies, and a relay thread forwards the worker's
//! stderr to the host.

pub mod config;
pub mod error;
pub mod message;
mod reader;
mod registry;
mod relay;
pub mod transport;

pub use config::{Diagnostics, TransportConfig};
pub use error::{CodecError, Result, TransportError};
pub use message::{
    InboundMessage, JsonCodec, MessageCodec, OutboundMessage, ProtocolErrorPayload, Request,
    ERROR_KIND, PROTOCOL_ERROR_ID,
};
pub use transport::Transport;
pub use workerpipe_process::{WorkerPipes, WorkerProcess};
