//! Error taxonomy.
//!
//! Every failure surfaced by the library maps to one [`CacheError`] variant.
//! Configuration problems are fatal and reported before the affected
//! component becomes live; protocol and transport failures are reported to
//! the calling operation, never silently swallowed. A write whose
//! invalidation barrier cannot complete must not report success.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Common error conditions.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid or missing configuration, including TLS material problems
    /// and security setup attempted after the server has started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `start()` called on a component that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// Shared secret mismatch during registration.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Operation attempted without an established, registered connection.
    #[error("not connected")]
    NotConnected,

    /// No response within the caller's deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The peer went away while an operation was in flight.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The peer sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Inbound frame exceeds the configured maximum.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or rustls configuration failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Error reported by the server over the wire.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },
}

impl CacheError {
    /// Whether the caller can reasonably retry after reconnecting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout(_) | Self::Disconnected(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings() {
        let err = CacheError::Configuration("missing key".into());
        assert_eq!(err.to_string(), "configuration error: missing key");

        let err = CacheError::FrameTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(
            err.to_string(),
            "frame too large: 2048 bytes exceeds maximum 1024"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CacheError::NotConnected.is_recoverable());
        assert!(CacheError::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(!CacheError::AlreadyStarted.is_recoverable());
        assert!(!CacheError::Authentication("bad secret".into()).is_recoverable());
    }
}
