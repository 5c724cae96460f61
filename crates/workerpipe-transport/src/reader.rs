use std::io::Read;
use std::sync::Arc;

use tracing::{debug, trace};
use workerpipe_frame::FrameReader;

use crate::transport::Shared;

/// Reader loop: decode frames from the worker's stdout and dispatch them
/// until the stream ends or the transport shuts down.
pub(crate) fn run(shared: Arc<Shared>, mut frames: FrameReader<Box<dyn Read + Send>>) {
    loop {
        let frame = match frames.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                if shared.is_closing() {
                    debug!("reader stopped");
                } else {
                    shared.fail(err.into());
                }
                return;
            }
        };

        if shared.is_closing() {
            debug!("reader stopped");
            return;
        }

        let message = match shared.codec.decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                shared.fail(err.into());
                return;
            }
        };

        let delivered = shared.dispatch(&message);
        if delivered == 0 {
            debug!(kind = %message.kind, id = ?message.correlation_id(), "no pending request for message");
        } else {
            trace!(kind = %message.kind, delivered, "dispatched message");
        }
    }
}
