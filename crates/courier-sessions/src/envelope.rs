//! Status envelope and request payload codecs for the session topics.
//!
//! Every reply is one status byte followed by a u32-LE length-prefixed
//! payload (ok) or error message (error) — the generic success/error
//! envelope any plugin can reuse over the core's raw data channel.
//! Request payloads use the same little-endian length-prefixed layout:
//!
//! ```text
//! set: ttl(4) key_len(4) key data_len(4) data
//! get: key_len(4) key
//! ttl: ttl(4) key_len(4) key
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Status byte of a successful reply.
pub const STATUS_OK: u8 = 0x01;
/// Status byte of an error reply.
pub const STATUS_ERROR: u8 = 0x02;

/// A request payload ended before a declared field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session payload truncated")]
pub struct PayloadTruncated;

/// Encode a success envelope around `data`.
#[allow(clippy::cast_possible_truncation)]
pub fn ok_body(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len());
    buf.put_u8(STATUS_OK);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Encode an error envelope carrying `message`.
#[allow(clippy::cast_possible_truncation)]
pub fn error_body(message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + message.len());
    buf.put_u8(STATUS_ERROR);
    buf.put_u32_le(message.len() as u32);
    buf.put_slice(message.as_bytes());
    buf.freeze()
}

/// Decode a reply envelope: `Ok(payload)` for ok status, `Err(message)`
/// for error status. The client-side counterpart of
/// [`ok_body`]/[`error_body`].
pub fn decode_body(data: &[u8]) -> Result<Result<Bytes, String>, PayloadTruncated> {
    let mut rest = data;
    let status = take_u8(&mut rest)?;
    let len = take_u32(&mut rest)?;
    let payload = take_slice(&mut rest, len)?;
    match status {
        STATUS_OK => Ok(Ok(Bytes::copy_from_slice(payload))),
        STATUS_ERROR => Ok(Err(String::from_utf8_lossy(payload).into_owned())),
        _ => Err(PayloadTruncated),
    }
}

/// Build a `sessions|set` request payload.
#[allow(clippy::cast_possible_truncation)]
pub fn set_request(key: &str, value: &[u8], ttl: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + key.len() + value.len());
    buf.put_i32_le(ttl);
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key.as_bytes());
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
    buf.freeze()
}

/// Build a `sessions|get` request payload.
#[allow(clippy::cast_possible_truncation)]
pub fn get_request(key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + key.len());
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key.as_bytes());
    buf.freeze()
}

/// Build a `sessions|ttl` request payload.
#[allow(clippy::cast_possible_truncation)]
pub fn ttl_request(key: &str, ttl: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + key.len());
    buf.put_i32_le(ttl);
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key.as_bytes());
    buf.freeze()
}

#[derive(Debug)]
pub(crate) struct SetRequest {
    pub ttl: i32,
    pub key: String,
    pub value: Vec<u8>,
}

pub(crate) fn parse_set(data: &[u8]) -> Result<SetRequest, PayloadTruncated> {
    let mut rest = data;
    let ttl = take_i32(&mut rest)?;
    let key = take_string(&mut rest)?;
    let value_len = take_u32(&mut rest)?;
    let value = take_slice(&mut rest, value_len)?.to_vec();
    Ok(SetRequest { ttl, key, value })
}

pub(crate) fn parse_get(data: &[u8]) -> Result<String, PayloadTruncated> {
    let mut rest = data;
    take_string(&mut rest)
}

#[derive(Debug)]
pub(crate) struct TtlRequest {
    pub ttl: i32,
    pub key: String,
}

pub(crate) fn parse_ttl(data: &[u8]) -> Result<TtlRequest, PayloadTruncated> {
    let mut rest = data;
    let ttl = take_i32(&mut rest)?;
    let key = take_string(&mut rest)?;
    Ok(TtlRequest { ttl, key })
}

fn take_u8(rest: &mut &[u8]) -> Result<u8, PayloadTruncated> {
    let (&first, tail) = rest.split_first().ok_or(PayloadTruncated)?;
    *rest = tail;
    Ok(first)
}

#[allow(clippy::cast_possible_truncation)]
fn take_u32(rest: &mut &[u8]) -> Result<usize, PayloadTruncated> {
    if rest.len() < 4 {
        return Err(PayloadTruncated);
    }
    let value = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    *rest = &rest[4..];
    Ok(value)
}

fn take_i32(rest: &mut &[u8]) -> Result<i32, PayloadTruncated> {
    if rest.len() < 4 {
        return Err(PayloadTruncated);
    }
    let value = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    *rest = &rest[4..];
    Ok(value)
}

fn take_slice<'a>(rest: &mut &'a [u8], len: usize) -> Result<&'a [u8], PayloadTruncated> {
    if len > rest.len() {
        return Err(PayloadTruncated);
    }
    let (taken, tail) = rest.split_at(len);
    *rest = tail;
    Ok(taken)
}

fn take_string(rest: &mut &[u8]) -> Result<String, PayloadTruncated> {
    let len = take_u32(rest)?;
    let bytes = take_slice(rest, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
