//! Framed request/response messaging with a worker subprocess over stdio.
//!
//! A host launches one worker process and exchanges length-prefixed
//! messages with it over the worker's stdin and stdout, while the worker's
//! stderr is relayed to the host. Any number of threads can have requests
//! in flight at once; replies are matched back to their callers by
//! correlation id.
//!
//! # Crate Structure
//!
//! - [`process`]: spawning the worker and bundling its stdio streams
//! - [`frame`]: varint length-prefixed framing (async codec behind `async`)
//! - [`transport`]: envelopes, correlation, and the [`transport::Transport`] facade
//!
//! # Example
//!
//! ```no_run
//! use std::process::Command;
//!
//! use serde::Serialize;
//! use workerpipe::transport::{Request, Transport};
//!
//! #[derive(Serialize)]
//! struct VersionRequest {
//!     id: u32,
//! }
//!
//! impl Request for VersionRequest {
//!     const KIND: &'static str = "version_request";
//! }
//!
//! let transport = Transport::spawn(&mut Command::new("my-worker"))?;
//! let reply = transport.send(&VersionRequest { id: 1 }, 1)?;
//! println!("{}: {}", reply.kind, reply.payload);
//! transport.close();
//! # Ok::<(), workerpipe::transport::TransportError>(())
//! ```

/// Re-export process types.
pub mod process {
    pub use workerpipe_process::*;
}

/// Re-export frame types.
pub mod frame {
    pub use workerpipe_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use workerpipe_transport::*;
}
