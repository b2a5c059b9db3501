//! Wire message set.
//!
//! Every frame carries one [`Envelope`]: a correlation identifier plus a
//! [`Message`]. Requests pick a fresh correlation id; the matching response
//! echoes it. Server-initiated INVALIDATE fan-out uses server-chosen ids,
//! which the client echoes back in INVALIDATE_ACK, so fan-out traffic never
//! collides with the client's own outstanding requests.

use crate::core::time::Expiry;
use bytes::Bytes;

/// Message kind tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Client announces itself with its shared secret.
    Register = 1,
    /// Server accepts or rejects a registration.
    RegisterAck = 2,
    /// Write a value.
    Put = 3,
    /// Write acknowledged; barrier completed.
    PutAck = 4,
    /// Fetch a value.
    Get = 5,
    /// Fetch result, present or absent.
    GetResult = 6,
    /// Evict a key. Client request or server fan-out.
    Invalidate = 7,
    /// Holder confirms eviction.
    InvalidateAck = 8,
    /// Liveness probe, either direction.
    Heartbeat = 9,
    /// Server-reported failure.
    Error = 10,
    /// Client is going away.
    Unregister = 11,
}

impl MessageKind {
    /// Parse a wire tag.
    pub fn from_wire(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Register,
            2 => Self::RegisterAck,
            3 => Self::Put,
            4 => Self::PutAck,
            5 => Self::Get,
            6 => Self::GetResult,
            7 => Self::Invalidate,
            8 => Self::InvalidateAck,
            9 => Self::Heartbeat,
            10 => Self::Error,
            11 => Self::Unregister,
            _ => return None,
        })
    }
}

/// Error codes carried by [`Message::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Shared secret mismatch.
    AuthenticationFailed = 1,
    /// Operation received before a successful REGISTER.
    NotRegistered = 2,
    /// Malformed or out-of-place message.
    BadRequest = 3,
    /// Coordinator-side failure.
    Internal = 4,
}

impl ErrorCode {
    /// Parse a wire code; unknown codes map to [`ErrorCode::Internal`].
    pub fn from_wire(code: u16) -> Self {
        match code {
            1 => Self::AuthenticationFailed,
            2 => Self::NotRegistered,
            3 => Self::BadRequest,
            _ => Self::Internal,
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Register {
        client_id: String,
        shared_secret: String,
    },
    RegisterAck {
        accepted: bool,
        reason: String,
    },
    Put {
        key: String,
        value: Bytes,
        expiry: Expiry,
    },
    PutAck {
        key: String,
        version: u64,
    },
    Get {
        key: String,
    },
    GetResult {
        key: String,
        /// `None` when the key is absent or expired on the server.
        value: Option<Bytes>,
        version: u64,
        expiry: Expiry,
    },
    Invalidate {
        key: String,
        /// Client whose operation triggered the eviction.
        origin_client_id: String,
    },
    InvalidateAck {
        key: String,
    },
    Heartbeat {
        timestamp: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Unregister {
        client_id: String,
    },
}

impl Message {
    /// Wire kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register { .. } => MessageKind::Register,
            Self::RegisterAck { .. } => MessageKind::RegisterAck,
            Self::Put { .. } => MessageKind::Put,
            Self::PutAck { .. } => MessageKind::PutAck,
            Self::Get { .. } => MessageKind::Get,
            Self::GetResult { .. } => MessageKind::GetResult,
            Self::Invalidate { .. } => MessageKind::Invalidate,
            Self::InvalidateAck { .. } => MessageKind::InvalidateAck,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::Error { .. } => MessageKind::Error,
            Self::Unregister { .. } => MessageKind::Unregister,
        }
    }
}

/// A correlation id paired with a message; the unit of framing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Request/response matching token. Responses echo the request's id.
    pub correlation_id: u64,
    /// The payload.
    pub message: Message,
}

impl Envelope {
    /// Convenience constructor.
    pub fn new(correlation_id: u64, message: Message) -> Self {
        Self {
            correlation_id,
            message,
        }
    }
}
