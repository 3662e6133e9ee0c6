//! Binary frame codec.
//!
//! Header layout (little-endian, fixed 16 bytes):
//!
//! ```text
//! byte 0:      type          (Ping | Pong | Post | Back | Close)
//! byte 1:      longtime flag (0x00 | 0x01)
//! bytes 2-11:  message id    (10 raw bytes)
//! bytes 12-15: body length   (u32; 0 when no key/data follow)
//! ```
//!
//! A non-empty body is `key length`(4) `key`(UTF-8) `data length`(4)
//! `data`. Decoding validates every declared length against the bytes
//! actually present and signals a discardable [`DecodeError`] on any
//! mismatch; it never panics on malformed input.

use bytes::{BufMut, Bytes, BytesMut};

use crate::msgid::{MESSAGE_ID_LEN, MessageId};

/// Fixed header length preceding the optional body.
pub const HEADER_LEN: usize = 16;

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Orderly connection termination.
    Close = 0x01,
    /// Liveness probe, answered by a Pong carrying the same message id.
    Ping = 0x14,
    /// Answer to a Ping.
    Pong = 0x15,
    /// Request or notification carrying a topic key.
    Post = 0x28,
    /// Correlated reply to a Post.
    Back = 0x29,
}

impl FrameKind {
    /// Parse a wire type byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Close),
            0x14 => Some(Self::Ping),
            0x15 => Some(Self::Pong),
            0x28 => Some(Self::Post),
            0x29 => Some(Self::Back),
            _ => None,
        }
    }

    /// The wire type byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Why a buffer was rejected by [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header.
    #[error("frame too short: {len} bytes, header needs {HEADER_LEN}")]
    TooShort {
        /// Total bytes received.
        len: usize,
    },
    /// Type byte does not name a known frame kind.
    #[error("unknown frame type byte {0:#04x}")]
    UnknownKind(u8),
    /// Declared body length disagrees with the bytes after the header.
    #[error("declared body length {declared} but {actual} bytes follow the header")]
    BodyLengthMismatch {
        /// Length the header declared.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// A key/data length field overruns the remaining body.
    #[error("field of {needed} bytes overruns body ({remaining} bytes remaining)")]
    FieldOverrun {
        /// Bytes the field claims.
        needed: usize,
        /// Bytes left in the body.
        remaining: usize,
    },
    /// Body bytes left over after the declared key and data.
    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),
    /// Key bytes are not valid UTF-8.
    #[error("frame key is not valid UTF-8")]
    KeyNotUtf8,
}

/// One discrete wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub kind: FrameKind,
    /// Suppresses the receiver's default-reply timer when set on a Post.
    pub longtime: bool,
    /// Correlation token echoed by the eventual reply.
    pub message_id: MessageId,
    /// Topic key; empty on header-only frames.
    pub key: String,
    /// Opaque payload; empty on header-only frames.
    pub data: Bytes,
}

impl Frame {
    /// A Post frame carrying `key` and `data`.
    pub fn post(message_id: MessageId, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Post,
            longtime: false,
            message_id,
            key: key.into(),
            data: data.into(),
        }
    }

    /// A Back frame echoing the inbound `message_id` and `key`.
    pub fn back(message_id: MessageId, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Back,
            longtime: false,
            message_id,
            key: key.into(),
            data: data.into(),
        }
    }

    /// The header-only Back frame used as a default reply.
    pub fn back_empty(message_id: MessageId) -> Self {
        Self {
            kind: FrameKind::Back,
            longtime: false,
            message_id,
            key: String::new(),
            data: Bytes::new(),
        }
    }

    /// A header-only Ping frame.
    pub fn ping(message_id: MessageId) -> Self {
        Self {
            kind: FrameKind::Ping,
            longtime: false,
            message_id,
            key: String::new(),
            data: Bytes::new(),
        }
    }

    /// A header-only Close frame.
    pub fn close(message_id: MessageId) -> Self {
        Self {
            kind: FrameKind::Close,
            longtime: false,
            message_id,
            key: String::new(),
            data: Bytes::new(),
        }
    }

    /// Whether the frame carries a key/data body.
    pub fn has_body(&self) -> bool {
        !(self.key.is_empty() && self.data.is_empty())
    }

    /// Serialize into wire bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Bytes {
        let body_len = if self.has_body() {
            8 + self.key.len() + self.data.len()
        } else {
            0
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        buf.put_u8(self.kind.as_byte());
        buf.put_u8(u8::from(self.longtime));
        buf.put_slice(self.message_id.as_bytes());
        buf.put_u32_le(body_len as u32);
        if body_len > 0 {
            buf.put_u32_le(self.key.len() as u32);
            buf.put_slice(self.key.as_bytes());
            buf.put_u32_le(self.data.len() as u32);
            buf.put_slice(&self.data);
        }
        buf.freeze()
    }

    /// Parse wire bytes. Malformed input is rejected, never panicked on.
    pub fn decode(input: &[u8]) -> Result<Self, DecodeError> {
        if input.len() < HEADER_LEN {
            return Err(DecodeError::TooShort { len: input.len() });
        }
        let kind = FrameKind::from_byte(input[0]).ok_or(DecodeError::UnknownKind(input[0]))?;
        let longtime = input[1] != 0;
        let mut raw_id = [0u8; MESSAGE_ID_LEN];
        raw_id.copy_from_slice(&input[2..2 + MESSAGE_ID_LEN]);
        let message_id = MessageId::from_bytes(raw_id);

        let declared = read_u32_le(&input[12..16]);
        let mut body = &input[HEADER_LEN..];
        if declared != body.len() {
            return Err(DecodeError::BodyLengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        if declared == 0 {
            return Ok(Self {
                kind,
                longtime,
                message_id,
                key: String::new(),
                data: Bytes::new(),
            });
        }

        let key_len = take_u32_le(&mut body)?;
        let key_bytes = take_bytes(&mut body, key_len)?;
        let key = std::str::from_utf8(key_bytes)
            .map_err(|_| DecodeError::KeyNotUtf8)?
            .to_owned();
        let data_len = take_u32_le(&mut body)?;
        let data = Bytes::copy_from_slice(take_bytes(&mut body, data_len)?);
        if !body.is_empty() {
            return Err(DecodeError::TrailingBytes(body.len()));
        }

        Ok(Self {
            kind,
            longtime,
            message_id,
            key,
            data,
        })
    }
}

/// Rewrite a raw Ping frame into its Pong answer: type byte flipped in
/// place, same message id, no body. Returns `None` when the buffer is not
/// a Ping header.
pub fn pong_reply(raw: &[u8]) -> Option<[u8; HEADER_LEN]> {
    if raw.len() < HEADER_LEN || raw[0] != FrameKind::Ping.as_byte() {
        return None;
    }
    let mut out = [0u8; HEADER_LEN];
    out.copy_from_slice(&raw[..HEADER_LEN]);
    out[0] = FrameKind::Pong.as_byte();
    out[12..16].copy_from_slice(&0u32.to_le_bytes());
    Some(out)
}

#[allow(clippy::cast_possible_truncation)]
fn read_u32_le(bytes: &[u8]) -> usize {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

fn take_u32_le(body: &mut &[u8]) -> Result<usize, DecodeError> {
    if body.len() < 4 {
        return Err(DecodeError::FieldOverrun {
            needed: 4,
            remaining: body.len(),
        });
    }
    let value = read_u32_le(&body[..4]);
    *body = &body[4..];
    Ok(value)
}

fn take_bytes<'a>(body: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if len > body.len() {
        return Err(DecodeError::FieldOverrun {
            needed: len,
            remaining: body.len(),
        });
    }
    let (taken, rest) = body.split_at(len);
    *body = rest;
    Ok(taken)
}
