//! Byte-stream tokenizer and serializer.
//!
//! [`StompCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//! Frames are delimited by a NUL byte. End-of-line bytes between frames are
//! heart-beats and are discarded.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// Default upper bound for a single frame (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// NUL-delimited text frame codec.
///
/// # Invariants
///
/// - `next_index` never exceeds the length of the buffer handed to the last
///   `decode` call. It records how far the previous call scanned without
///   finding a terminator, so each byte is scanned once.
/// - A frame whose terminator lies beyond `max_frame_size` bytes is rejected
///   before it is copied out of the read buffer.
#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_size: usize,
    next_index: usize,
}

impl StompCodec {
    /// Codec with [`DEFAULT_MAX_FRAME_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Codec rejecting frames longer than `max_frame_size` bytes.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size, next_index: 0 }
    }

    /// Configured frame size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if self.next_index == 0 {
            let heartbeats = src.iter().take_while(|b| matches!(**b, b'\n' | b'\r')).count();
            src.advance(heartbeats);
        }

        let scan_from = self.next_index.min(src.len());
        let Some(offset) = src[scan_from..].iter().position(|b| *b == 0) else {
            if src.len() > self.max_frame_size {
                return Err(ProtocolError::FrameTooLarge {
                    size: src.len(),
                    max: self.max_frame_size,
                });
            }
            self.next_index = src.len();
            return Ok(None);
        };

        let end = scan_from + offset;
        self.next_index = 0;

        if end > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: end, max: self.max_frame_size });
        }

        let raw = src.split_to(end + 1);
        let text = std::str::from_utf8(&raw[..end]).map_err(|_| ProtocolError::InvalidUtf8)?;

        Frame::parse(text).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Trailing heart-beats are not a partial frame.
        if src.iter().all(|b| matches!(*b, b'\n' | b'\r')) {
            src.clear();
            return Ok(None);
        }

        let buffered = src.len();
        src.clear();
        self.next_index = 0;
        Err(ProtocolError::TruncatedFrame(buffered))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.encode(dst);
        Ok(())
    }
}
