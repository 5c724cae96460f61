use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{decode_varint, encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// A single `FrameWriter` is not synchronized; callers sharing one stream
/// across threads wrap it in a mutex so each frame is written in one piece.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode a payload and write it as one frame (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.config.check_payload(payload.len())?;

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        encode_frame(payload, &mut buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result?;

        self.flush()
    }

    /// Write a frame that was already encoded with [`encode_frame`].
    ///
    /// Lets callers do the encoding work before taking whatever lock guards
    /// this writer.
    pub fn write_encoded(&mut self, frame: &[u8]) -> Result<()> {
        if let Some((len, prefix)) = decode_varint(frame)? {
            let len = usize::try_from(len).map_err(|_| FrameError::InvalidLength)?;
            self.config.check_payload(len)?;
            if prefix.checked_add(len) != Some(frame.len()) {
                return Err(FrameError::InvalidLength);
            }
        } else {
            return Err(FrameError::InvalidLength);
        }

        self.write_all(frame)?;
        self.flush()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_frame;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"hello").unwrap();

        let mut wire = written(writer);
        assert_eq!(wire[0], 5);
        let frame = decode_frame(&mut wire, None).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(wire.is_empty());
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"one").unwrap();
        writer.send(&[7u8; 200]).unwrap();
        writer.send(b"three").unwrap();

        let mut wire = written(writer);

        let f1 = decode_frame(&mut wire, None).unwrap().unwrap();
        let f2 = decode_frame(&mut wire, None).unwrap().unwrap();
        let f3 = decode_frame(&mut wire, None).unwrap().unwrap();

        assert_eq!(f1.as_ref(), b"one");
        assert_eq!(f2.as_ref(), &[7u8; 200][..]);
        assert_eq!(f3.as_ref(), b"three");
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: Some(4),
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn write_encoded_passes_frame_through() {
        let mut frame = BytesMut::new();
        encode_frame(b"abc", &mut frame);

        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_encoded(&frame).unwrap();

        let mut wire = written(writer);
        let decoded = decode_frame(&mut wire, None).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), b"abc");
    }

    #[test]
    fn write_encoded_rejects_malformed_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        // Prefix says 5 bytes, only 2 follow.
        let err = writer.write_encoded(&[5, b'a', b'b']).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength));

        let err = writer.write_encoded(&[0x80]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength));

        assert!(written(writer).is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send(b"retry").unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data, b"\x05retry");
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn written_bytes_decode() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"z").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire));
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"z");
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
