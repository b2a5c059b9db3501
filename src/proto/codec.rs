//! Binary encode/decode of envelope payloads.
//!
//! Layout: `u8` kind tag, `u64` correlation id (big-endian), then the
//! kind-specific fields. Strings and byte values are u32-length-prefixed;
//! strings must be valid UTF-8. The outer frame length prefix is handled by
//! [`crate::net::frame`], so a decoder here always sees exactly one whole
//! payload; anything truncated or trailing is a protocol violation.

use crate::core::error::{CacheError, CacheResult};
use crate::core::time::Expiry;
use crate::proto::message::{Envelope, ErrorCode, Message, MessageKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encode one envelope into a payload buffer.
pub fn encode_envelope(envelope: &Envelope, buf: &mut BytesMut) {
    buf.put_u8(envelope.message.kind() as u8);
    buf.put_u64(envelope.correlation_id);

    match &envelope.message {
        Message::Register {
            client_id,
            shared_secret,
        } => {
            put_str(buf, client_id);
            put_str(buf, shared_secret);
        }
        Message::RegisterAck { accepted, reason } => {
            buf.put_u8(u8::from(*accepted));
            put_str(buf, reason);
        }
        Message::Put { key, value, expiry } => {
            put_str(buf, key);
            put_bytes(buf, value);
            buf.put_u64(expiry.millis());
        }
        Message::PutAck { key, version } => {
            put_str(buf, key);
            buf.put_u64(*version);
        }
        Message::Get { key } => {
            put_str(buf, key);
        }
        Message::GetResult {
            key,
            value,
            version,
            expiry,
        } => {
            put_str(buf, key);
            match value {
                Some(value) => {
                    buf.put_u8(1);
                    put_bytes(buf, value);
                }
                None => buf.put_u8(0),
            }
            buf.put_u64(*version);
            buf.put_u64(expiry.millis());
        }
        Message::Invalidate {
            key,
            origin_client_id,
        } => {
            put_str(buf, key);
            put_str(buf, origin_client_id);
        }
        Message::InvalidateAck { key } => {
            put_str(buf, key);
        }
        Message::Heartbeat { timestamp } => {
            buf.put_u64(*timestamp);
        }
        Message::Error { code, message } => {
            buf.put_u16(*code as u16);
            put_str(buf, message);
        }
        Message::Unregister { client_id } => {
            put_str(buf, client_id);
        }
    }
}

/// Decode one envelope from a whole payload.
pub fn decode_envelope(payload: &mut Bytes) -> CacheResult<Envelope> {
    let tag = get_u8(payload)?;
    let kind = MessageKind::from_wire(tag)
        .ok_or_else(|| CacheError::Protocol(format!("unknown message tag {tag}")))?;
    let correlation_id = get_u64(payload)?;

    let message = match kind {
        MessageKind::Register => Message::Register {
            client_id: get_str(payload)?,
            shared_secret: get_str(payload)?,
        },
        MessageKind::RegisterAck => Message::RegisterAck {
            accepted: get_u8(payload)? != 0,
            reason: get_str(payload)?,
        },
        MessageKind::Put => Message::Put {
            key: get_str(payload)?,
            value: get_bytes(payload)?,
            expiry: Expiry::at_millis(get_u64(payload)?),
        },
        MessageKind::PutAck => Message::PutAck {
            key: get_str(payload)?,
            version: get_u64(payload)?,
        },
        MessageKind::Get => Message::Get {
            key: get_str(payload)?,
        },
        MessageKind::GetResult => {
            let key = get_str(payload)?;
            let value = if get_u8(payload)? != 0 {
                Some(get_bytes(payload)?)
            } else {
                None
            };
            Message::GetResult {
                key,
                value,
                version: get_u64(payload)?,
                expiry: Expiry::at_millis(get_u64(payload)?),
            }
        }
        MessageKind::Invalidate => Message::Invalidate {
            key: get_str(payload)?,
            origin_client_id: get_str(payload)?,
        },
        MessageKind::InvalidateAck => Message::InvalidateAck {
            key: get_str(payload)?,
        },
        MessageKind::Heartbeat => Message::Heartbeat {
            timestamp: get_u64(payload)?,
        },
        MessageKind::Error => Message::Error {
            code: ErrorCode::from_wire(get_u16(payload)?),
            message: get_str(payload)?,
        },
        MessageKind::Unregister => Message::Unregister {
            client_id: get_str(payload)?,
        },
    };

    if payload.has_remaining() {
        return Err(CacheError::Protocol(format!(
            "{} trailing bytes after {kind:?} payload",
            payload.remaining()
        )));
    }

    Ok(Envelope::new(correlation_id, message))
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &Bytes) {
    buf.put_u32(b.len() as u32);
    buf.put_slice(b);
}

fn need(payload: &Bytes, n: usize) -> CacheResult<()> {
    if payload.remaining() < n {
        return Err(CacheError::Protocol(format!(
            "truncated payload: need {n} bytes, have {}",
            payload.remaining()
        )));
    }
    Ok(())
}

fn get_u8(payload: &mut Bytes) -> CacheResult<u8> {
    need(payload, 1)?;
    Ok(payload.get_u8())
}

fn get_u16(payload: &mut Bytes) -> CacheResult<u16> {
    need(payload, 2)?;
    Ok(payload.get_u16())
}

fn get_u64(payload: &mut Bytes) -> CacheResult<u64> {
    need(payload, 8)?;
    Ok(payload.get_u64())
}

fn get_bytes(payload: &mut Bytes) -> CacheResult<Bytes> {
    need(payload, 4)?;
    let len = payload.get_u32() as usize;
    need(payload, len)?;
    Ok(payload.split_to(len))
}

fn get_str(payload: &mut Bytes) -> CacheResult<String> {
    let raw = get_bytes(payload)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| CacheError::Protocol("string field is not valid UTF-8".to_string()))
}
