//! Wire protocol.
//!
//! The client and server exchange a fixed message set over length-prefixed
//! frames:
//! - [`message`] - Message kinds, envelopes, and wire error codes
//! - [`codec`] - Binary encode/decode of envelope payloads

pub mod codec;
pub mod message;

pub use codec::{decode_envelope, encode_envelope};
pub use message::{Envelope, ErrorCode, Message, MessageKind};
