//! Binary framing for [`Message`] values.
//!
//! Wire format: `[kind: u8][body_len: u32 BE][body]`, all integers big-endian.
//!
//! - `Login`    body: `[name_len: u32][name: UTF-8]`
//! - `Snapshot` body: `[width: u32][height: u32][width*height x pixel: u32]`
//! - `Rejected` body: `[reason_len: u32][reason: UTF-8]`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError, FrameError};
use crate::message::{FrameKind, Message};
use crate::raster::{pixel_count, RasterSnapshot};

/// Size of the `kind` + `body_len` prefix.
pub const HEADER_LEN: usize = 5;

/// Maximum frame body size (32 MiB) to guard against malicious peers.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

const SNAPSHOT_DIMS_LEN: usize = 8;

/// Encode a message into a standalone frame, under the same limit [`decode`] enforces.
pub fn encode(message: &Message) -> Result<Bytes, EncodeError> {
    encode_with_limit(message, DEFAULT_MAX_FRAME_BYTES)
}

/// Encode a message into a standalone frame whose body is at most `max_body` bytes.
pub fn encode_with_limit(message: &Message, max_body: usize) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf, max_body)?;
    Ok(buf.freeze())
}

/// Decode the first frame in `buf`, ignoring anything after it.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    decode_frame(buf, DEFAULT_MAX_FRAME_BYTES).map(|(message, _)| message)
}

/// Append the frame for `message` to `dst`, refusing bodies larger than `max_body`.
pub fn encode_into(message: &Message, dst: &mut BytesMut, max_body: usize) -> Result<(), EncodeError> {
    let body_len = body_len(message);
    let limit = max_body.min(u32::MAX as usize);
    if body_len > limit {
        return Err(EncodeError::FrameTooLarge {
            len: body_len,
            max: limit,
        });
    }

    dst.reserve(HEADER_LEN + body_len);
    dst.put_u8(message.kind() as u8);
    dst.put_u32(body_len as u32);
    match message {
        Message::Login { display_name } => put_text(dst, display_name),
        Message::Rejected { reason } => put_text(dst, reason),
        Message::Snapshot(snapshot) => {
            dst.put_u32(snapshot.width());
            dst.put_u32(snapshot.height());
            for pixel in snapshot.pixels() {
                dst.put_u32(*pixel);
            }
        }
    }
    Ok(())
}

/// Decode one frame from the front of `buf`, returning it with the number of bytes consumed.
pub fn decode_frame(buf: &[u8], max_body: usize) -> Result<(Message, usize), DecodeError> {
    let Some(&kind_byte) = buf.first() else {
        return Err(DecodeError::Truncated { needed: HEADER_LEN });
    };
    let kind = FrameKind::from_byte(kind_byte).ok_or(DecodeError::UnknownKind(kind_byte))?;
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: HEADER_LEN - buf.len(),
        });
    }

    let body_len = read_u32(&buf[1..HEADER_LEN]) as usize;
    if body_len > max_body {
        return Err(DecodeError::FrameTooLarge {
            len: body_len,
            max: max_body,
        });
    }
    let total = HEADER_LEN + body_len;
    if buf.len() < total {
        return Err(DecodeError::Truncated {
            needed: total - buf.len(),
        });
    }

    let body = &buf[HEADER_LEN..total];
    let message = match kind {
        FrameKind::Login => Message::Login {
            display_name: decode_text(body)?,
        },
        FrameKind::Rejected => Message::Rejected {
            reason: decode_text(body)?,
        },
        FrameKind::Snapshot => Message::Snapshot(decode_snapshot(body)?),
    };
    Ok((message, total))
}

fn body_len(message: &Message) -> usize {
    match message {
        Message::Login { display_name } => 4 + display_name.len(),
        Message::Rejected { reason } => 4 + reason.len(),
        Message::Snapshot(snapshot) => {
            SNAPSHOT_DIMS_LEN + snapshot.pixels().len().saturating_mul(4)
        }
    }
}

fn put_text(dst: &mut BytesMut, text: &str) {
    dst.put_u32(text.len() as u32);
    dst.put_slice(text.as_bytes());
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

fn decode_text(body: &[u8]) -> Result<String, DecodeError> {
    if body.len() < 4 {
        return Err(DecodeError::LengthMismatch {
            declared: 4,
            body: body.len(),
        });
    }
    let declared = read_u32(body) as usize;
    let text = &body[4..];
    if declared != text.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            body: text.len(),
        });
    }
    String::from_utf8(text.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

fn decode_snapshot(body: &[u8]) -> Result<RasterSnapshot, DecodeError> {
    if body.len() < SNAPSHOT_DIMS_LEN {
        return Err(DecodeError::LengthMismatch {
            declared: SNAPSHOT_DIMS_LEN,
            body: body.len(),
        });
    }
    let width = read_u32(&body[0..4]);
    let height = read_u32(&body[4..8]);
    let pixel_bytes = &body[SNAPSHOT_DIMS_LEN..];

    let matches = pixel_bytes.len() % 4 == 0
        && pixel_count(width, height) == Some(pixel_bytes.len() / 4);
    if !matches {
        return Err(DecodeError::SizeMismatch {
            width,
            height,
            pixels: pixel_bytes.len() / 4,
        });
    }

    let pixels = pixel_bytes.chunks_exact(4).map(read_u32).collect();
    RasterSnapshot::new(width, height, pixels)
}

/// Streaming adapter for [`tokio_util::codec::Framed`] transports.
///
/// Accepts both [`Message`] references and frames already encoded with [`encode`],
/// so a broadcast can be serialized once and written to many peers.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_body: usize,
    skip_unknown: bool,
}

impl FrameCodec {
    pub fn new(max_body: usize) -> Self {
        Self {
            max_body,
            skip_unknown: false,
        }
    }

    /// Silently discard frames of unrecognized kinds instead of failing.
    ///
    /// Used by clients, which are not the authority on protocol violations.
    pub fn skip_unknown_kinds(mut self) -> Self {
        self.skip_unknown = true;
        self
    }

    /// Consume an unknown-kind frame once it is fully buffered.
    fn skip_frame(&self, src: &mut BytesMut) -> Result<bool, FrameError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(false);
        }
        let body_len = read_u32(&src[1..HEADER_LEN]) as usize;
        if body_len > self.max_body {
            return Err(DecodeError::FrameTooLarge {
                len: body_len,
                max: self.max_body,
            }
            .into());
        }
        let total = HEADER_LEN + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(false);
        }
        src.advance(total);
        Ok(true)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        loop {
            match decode_frame(src, self.max_body) {
                Ok((message, used)) => {
                    src.advance(used);
                    return Ok(Some(message));
                }
                Err(DecodeError::Truncated { needed }) => {
                    src.reserve(needed);
                    return Ok(None);
                }
                Err(DecodeError::UnknownKind(_)) if self.skip_unknown => {
                    if !self.skip_frame(src)? {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => match decode_frame(src, self.max_body) {
                Err(DecodeError::UnknownKind(_)) => Ok(None),
                Err(err) => Err(err.into()),
                Ok(_) => Ok(None),
            },
        }
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_into(message, dst, self.max_body)?;
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
