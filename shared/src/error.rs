use std::io;

use thiserror::Error;

/// Reasons a byte buffer could not be turned into a [`Message`](crate::message::Message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended before a complete frame was available.
    #[error("frame truncated: need {needed} more bytes")]
    Truncated { needed: usize },
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),
    /// Declared dimensions disagree with the number of pixel values present.
    #[error("snapshot declares {width}x{height} but carries {pixels} pixel values")]
    SizeMismatch { width: u32, height: u32, pixels: usize },
    /// A length-prefixed string does not fill its frame body exactly.
    #[error("declared string length {declared} does not match frame body of {body} bytes")]
    LengthMismatch { declared: usize, body: usize },
    #[error("frame text is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame body of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
}

/// Errors surfaced while reading or writing frames over a transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),
    #[error("unencodable frame: {0}")]
    Encode(#[from] EncodeError),
}

/// A message whose body cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("frame body of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
}
