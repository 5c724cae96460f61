//! Varint length-prefixed message framing for worker process pipes.
//!
//! Every message travelling over a worker's stdin/stdout is framed as:
//! - An unsigned LEB128 varint holding the payload length
//! - Exactly that many payload bytes
//!
//! Readers always hand back complete payloads; writers always emit complete
//! frames.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::VarintCodec;
pub use codec::{
    decode_frame, decode_varint, encode_frame, encode_varint, prefix_len, FrameConfig,
    MAX_PREFIX_LEN,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
