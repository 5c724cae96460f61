//! `tokio_util::codec` adapter for the varint framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Codec for use with `FramedRead`/`FramedWrite` over async pipes.
#[derive(Debug, Clone, Default)]
pub struct VarintCodec {
    config: FrameConfig,
}

impl VarintCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Decoder for VarintCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for VarintCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = item.as_ref();
        self.config.check_payload(payload.len())?;
        encode_frame(payload, dst);
        Ok(())
    }
}
