//! Client near-cache and protocol engine.
//!
//! - [`local_cache`] - Process-local near-cache with read-time expiry
//! - [`client`] - Public client API and the connection protocol engine

pub mod client;
pub mod local_cache;

pub use client::CacheClient;
pub use local_cache::CachedEntry;
