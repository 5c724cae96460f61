use std::io::{Read, Write};

use tracing::{debug, info, warn};
use workerpipe_frame::{FrameError, FrameReader, FrameWriter};
use workerpipe_transport::{InboundMessage, OutboundMessage, PROTOCOL_ERROR_ID};

use crate::cmd::EchoArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};

const REQUEST_SUFFIX: &str = "_request";
const RESPONSE_SUFFIX: &str = "_response";

pub fn run(args: EchoArgs) -> CliResult<i32> {
    let mut worker = EchoWorker::new(args.batch as usize, args.protocol_error_on);
    info!(batch = worker.batch, "echo worker ready");

    let served = serve(
        &mut worker,
        FrameReader::new(std::io::stdin().lock()),
        FrameWriter::new(std::io::stdout().lock()),
    )
    .map_err(|err| frame_error("echo worker failed", &err))?;

    info!(served, "echo worker exiting");
    Ok(SUCCESS)
}

/// Answer frames from `requests` until the host closes the stream.
///
/// Replies still held for an incomplete batch are flushed before
/// returning. Returns the number of replies written.
fn serve<R: Read, W: Write>(
    worker: &mut EchoWorker,
    mut requests: FrameReader<R>,
    mut replies: FrameWriter<W>,
) -> Result<usize, FrameError> {
    let mut served = 0;
    loop {
        let outgoing = match requests.read_frame() {
            Ok(frame) => worker.handle(&frame),
            Err(FrameError::ConnectionClosed) => {
                for reply in worker.finish() {
                    write_reply(&mut replies, &reply)?;
                    served += 1;
                }
                return Ok(served);
            }
            Err(err) => return Err(err),
        };

        for reply in outgoing {
            write_reply(&mut replies, &reply)?;
            served += 1;
        }
    }
}

fn write_reply<W: Write>(
    replies: &mut FrameWriter<W>,
    reply: &InboundMessage,
) -> Result<(), FrameError> {
    let bytes = serde_json::to_vec(reply).map_err(|err| FrameError::Io(err.into()))?;
    replies.send(&bytes)
}

/// Reply policy of the echo worker.
struct EchoWorker {
    batch: usize,
    protocol_error_on: Option<String>,
    held: Vec<InboundMessage>,
}

impl EchoWorker {
    fn new(batch: usize, protocol_error_on: Option<String>) -> Self {
        Self {
            batch: batch.max(1),
            protocol_error_on,
            held: Vec::new(),
        }
    }

    /// Replies to send after receiving `frame`.
    fn handle(&mut self, frame: &[u8]) -> Vec<InboundMessage> {
        let request: OutboundMessage = match serde_json::from_slice(frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, size = frame.len(), "undecodable request");
                return vec![InboundMessage::protocol_error(
                    PROTOCOL_ERROR_ID,
                    format!("malformed request: {err}"),
                )];
            }
        };

        if self.protocol_error_on.as_deref() == Some(request.kind.as_str()) {
            warn!(kind = %request.kind, "rejecting request");
            return vec![InboundMessage::protocol_error(
                PROTOCOL_ERROR_ID,
                format!("unsupported request type: {}", request.kind),
            )];
        }

        debug!(kind = %request.kind, "echoing request");
        self.held.push(InboundMessage::new(
            response_kind(&request.kind),
            request.payload,
        ));
        if self.held.len() < self.batch {
            return Vec::new();
        }
        self.finish()
    }

    /// Release held replies, newest first.
    fn finish(&mut self) -> Vec<InboundMessage> {
        let mut released = std::mem::take(&mut self.held);
        released.reverse();
        released
    }
}

fn response_kind(kind: &str) -> String {
    match kind.strip_suffix(REQUEST_SUFFIX) {
        Some(base) => format!("{base}{RESPONSE_SUFFIX}"),
        None => kind.to_string(),
    }
}
