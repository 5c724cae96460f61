use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Longest valid length prefix: ten 7-bit groups cover a `u64`.
pub const MAX_PREFIX_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const DATA_BITS: u8 = 0x7F;

/// Append `value` to `dst` as an unsigned LEB128 varint.
///
/// Seven data bits per byte, least-significant group first. Every byte
/// except the last has its high bit set.
pub fn encode_varint(mut value: u64, dst: &mut BytesMut) {
    loop {
        let group = (value & u64::from(DATA_BITS)) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(group);
            return;
        }
        dst.put_u8(group | CONTINUATION);
    }
}

/// Decode a varint from the front of `src` without consuming it.
///
/// Returns the value and the number of prefix bytes, or `Ok(None)` when the
/// buffer ends before a byte with a clear high bit.
pub fn decode_varint(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (index, &byte) in src.iter().enumerate().take(MAX_PREFIX_LEN) {
        let group = u64::from(byte & DATA_BITS);
        // The tenth group only has room for bit 63.
        if index == MAX_PREFIX_LEN - 1 && group > 1 {
            return Err(FrameError::InvalidLength);
        }
        value |= group << (7 * index);
        if byte & CONTINUATION == 0 {
            return Ok(Some((value, index + 1)));
        }
    }

    if src.len() >= MAX_PREFIX_LEN {
        return Err(FrameError::InvalidLength);
    }
    Ok(None)
}

/// Number of bytes the length prefix occupies for a payload of `len` bytes.
pub fn prefix_len(len: usize) -> usize {
    let bits = usize::BITS - len.leading_zeros();
    (bits.max(1) as usize).div_ceil(7)
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────┬────────────────┐
/// │ Length (varint, 1-10B)   │ Payload        │
/// │ 7 bits/byte, LSB first   │ (Length bytes) │
/// └──────────────────────────┴────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(prefix_len(payload.len()) + payload.len());
    encode_varint(payload.len() as u64, dst);
    dst.put_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer and returns the
/// payload.
pub fn decode_frame(src: &mut BytesMut, max_payload: Option<usize>) -> Result<Option<Bytes>> {
    let Some((len, prefix)) = decode_varint(src)? else {
        return Ok(None); // Need more prefix bytes
    };

    let len = usize::try_from(len).map_err(|_| FrameError::InvalidLength)?;
    if let Some(max) = max_payload {
        if len > max {
            return Err(FrameError::PayloadTooLarge { size: len, max });
        }
    }

    let total = prefix.checked_add(len).ok_or(FrameError::InvalidLength)?;
    if src.len() < total {
        return Ok(None); // Need more payload bytes
    }

    src.advance(prefix);
    Ok(Some(src.split_to(len).freeze()))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. `None` leaves frames bounded only by memory.
    pub max_payload_size: Option<usize>,
}

impl FrameConfig {
    pub(crate) fn check_payload(&self, size: usize) -> Result<()> {
        match self.max_payload_size {
            Some(max) if size > max => Err(FrameError::PayloadTooLarge { size, max }),
            _ => Ok(()),
        }
    }
}
