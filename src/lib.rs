//! Embercache - coherent near-cache for keyed binary values.
//!
//! Embercache keeps a local in-memory copy of keyed byte values inside each
//! client process and routes all mutations through a single coordinating
//! server. Consistency comes from an explicit write/invalidate protocol
//! rather than replication: before a write or an explicit invalidation is
//! acknowledged, every other client known to hold a copy of that key has
//! evicted it (or has been declared disconnected).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   put/get/invalidate    ┌──────────────────────┐
//! │  CacheClient │ ──────────────────────▶ │     CacheServer      │
//! │  local cache │ ◀────────────────────── │  registry + holders  │
//! └──────────────┘   invalidate fan-out    └──────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy
//! - [`core::time`] - Expiry timestamps and clock access
//!
//! ## Networking
//! - [`net::frame`] - Length-prefixed framing over async streams
//! - [`net::transport`] - Plaintext/TLS listeners and connections
//! - [`net::tls`] - Certificate material and rustls config construction
//! - [`net::locator`] - Server endpoint resolution
//!
//! ## Protocol
//! - [`proto::message`] - Wire message set and envelopes
//! - [`proto::codec`] - Binary encode/decode of envelope payloads
//!
//! ## Server
//! - [`server::registry`] - Authoritative key table and holder sets
//! - [`server::session`] - Registered client sessions
//! - [`server::server`] - Coordinator lifecycle and the invalidation barrier
//!
//! ## Client
//! - [`client::local_cache`] - Process-local near-cache
//! - [`client::client`] - Protocol engine and public client API
//!
//! # Key Invariants
//!
//! - **ACK-BEFORE-SUCCESS**: a `put` or explicit invalidation is reported
//!   successful to its caller only after every reachable holder of the key
//!   has acknowledged eviction or has been declared disconnected.
//! - **NO-ORPHAN-HOLDERS**: a holder set never references a closed session.
//! - **PER-KEY-ORDER**: operations on one key are serialized; operations on
//!   different keys proceed concurrently.

// Core infrastructure
pub mod core;

// Networking and security
pub mod net;

// Wire protocol
pub mod proto;

// Coordinating server
pub mod server;

// Client near-cache and protocol engine
pub mod client;

// CLI surface
pub mod cli;
