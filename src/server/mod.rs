//! Coordinating server.
//!
//! The server is the single authority for key metadata and holder
//! membership:
//! - [`registry`] - Authoritative key table and holder sets
//! - [`session`] - Registered client sessions
//! - [`server`] - Lifecycle, dispatch, and the invalidation barrier

pub mod registry;
pub mod server;
pub mod session;

pub use server::CacheServer;
