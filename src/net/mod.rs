//! Networking layer.
//!
//! This module handles transport and security:
//! - [`frame`] - Length-prefixed framing over async streams
//! - [`transport`] - Plaintext/TLS listeners and connections
//! - [`tls`] - Certificate material and rustls config construction
//! - [`locator`] - Server endpoint resolution

pub mod frame;
pub mod locator;
pub mod tls;
pub mod transport;
