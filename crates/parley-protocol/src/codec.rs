//! Codecs for Parley events.
//!
//! Text WebSocket frames carry one JSON event each. Binary frames carry
//! MessagePack events with a length prefix, so several may share a frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest payload either codec accepts, 1 MiB.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Bytes in the big-endian `u32` that precedes each binary event.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Failure to turn an event into bytes or back.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload of {0} bytes is over the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    /// The buffer ends before the event does; holds the missing byte count.
    #[error("truncated event, {0} bytes short")]
    Incomplete(usize),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails or the text is too large.
pub fn to_json<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode an event from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a known event.
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode one event as `u32 length ‖ msgpack` (named fields).
///
/// # Errors
///
/// Fails when MessagePack encoding fails or the payload is over the limit.
pub fn encode<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Append one length-prefixed event to `buf`.
///
/// # Errors
///
/// Same as [`encode`]; `buf` is untouched on error.
pub fn encode_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode the first event in `data`, ignoring anything after it.
///
/// # Errors
///
/// [`ProtocolError::Incomplete`] when `data` stops short, otherwise a size
/// or MessagePack error.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    let Some(length) = read_length(data)? else {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    };
    let end = LENGTH_PREFIX_SIZE + length;
    match data.get(LENGTH_PREFIX_SIZE..end) {
        Some(payload) => Ok(rmp_serde::from_slice(payload)?),
        None => Err(ProtocolError::Incomplete(end - data.len())),
    }
}

/// Pop the next event off the front of `buf`.
///
/// `Ok(None)` leaves `buf` as it was and means more bytes are needed.
///
/// # Errors
///
/// Fails on an oversized length prefix or a payload that is not an event.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    match read_length(buf)? {
        Some(length) if buf.len() >= LENGTH_PREFIX_SIZE + length => {
            buf.advance(LENGTH_PREFIX_SIZE);
            let payload = buf.split_to(length);
            Ok(Some(rmp_serde::from_slice(&payload)?))
        }
        _ => Ok(None),
    }
}

fn read_length(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(prefix) = data.first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Ok(None);
    };
    match u32::from_be_bytes(*prefix) as usize {
        length if length > MAX_FRAME_SIZE => Err(ProtocolError::FrameTooLarge(length)),
        length => Ok(Some(length)),
    }
}
