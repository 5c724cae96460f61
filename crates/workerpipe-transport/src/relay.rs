use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tracing::debug;
use workerpipe_frame::FrameError;

use crate::config::Diagnostics;
use crate::transport::Shared;

const RELAY_CHUNK_SIZE: usize = 8 * 1024;

/// Copy the worker's stderr into `sink` until it closes.
///
/// The worker closing stderr while the transport is open counts as a
/// stream failure, same as stdout.
pub(crate) fn run(shared: Arc<Shared>, mut source: Box<dyn Read + Send>, sink: Diagnostics) {
    let mut chunk = [0u8; RELAY_CHUNK_SIZE];
    let failure = loop {
        let read = match source.read(&mut chunk) {
            Ok(0) => break FrameError::ConnectionClosed,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => break FrameError::Io(err),
        };
        if let Err(err) = sink.write(&chunk[..read]) {
            // Losing the host-side sink is not a worker failure.
            debug!(error = %err, "diagnostics sink rejected write");
        }
    };

    if shared.is_closing() {
        debug!("stderr relay stopped");
    } else {
        shared.fail(failure.into());
    }
}
