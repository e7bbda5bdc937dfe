//! Protocol error types.
//!
//! Decoding failures surfaced by [`crate::StompCodec`]. All of them are fatal
//! for the connection that produced the bytes: once the byte stream cannot be
//! tokenized there is no reliable frame boundary to resume from.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffered frame grew past the configured limit without a terminator.
    #[error("frame too large: {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The command line is empty.
    #[error("frame has an empty command line")]
    EmptyCommand,

    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Stream ended in the middle of a frame.
    #[error("stream ended inside a frame ({0} bytes buffered)")]
    TruncatedFrame(usize),

    /// Underlying transport failed while reading or writing.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
