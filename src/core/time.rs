//! Expiry timestamps and clock access.
//!
//! Cache entries carry an absolute expiry in milliseconds since the Unix
//! epoch, with zero meaning "never expires". Expiry is evaluated at read
//! time on both sides of the protocol; no background sweep is required.

use serde::{Deserialize, Serialize};

/// Absolute expiry timestamp in epoch milliseconds. Zero means never.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Expiry(pub u64);

impl Expiry {
    /// An entry that never expires.
    pub const NEVER: Expiry = Expiry(0);

    /// Create an expiry from epoch milliseconds.
    pub const fn at_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Expiry a number of milliseconds from the given instant.
    pub const fn after(now_ms: u64, ttl_ms: u64) -> Self {
        Self(now_ms + ttl_ms)
    }

    /// Whether this expiry has passed at the given clock reading.
    pub const fn is_expired_at(self, now_ms: u64) -> bool {
        self.0 != 0 && now_ms >= self.0
    }

    /// Raw millisecond value for the wire.
    pub const fn millis(self) -> u64 {
        self.0
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
