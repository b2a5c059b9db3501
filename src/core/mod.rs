//! Core infrastructure.
//!
//! This module contains the essential building blocks shared by the server
//! and the client:
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error taxonomy
//! - [`time`] - Expiry timestamps and clock access

pub mod config;
pub mod error;
pub mod time;
