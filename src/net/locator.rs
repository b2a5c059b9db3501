//! Server endpoint resolution.
//!
//! A locator turns a server endpoint description into one connectable
//! address. Locators are polymorphic over that single capability so that
//! discovery strategies (fixed host, directory-based, multi-node) can be
//! swapped without touching client code. [`FixedServerLocator`] is the
//! baseline implementation.

use crate::core::error::CacheResult;
use std::collections::HashMap;

/// Endpoint description of a coordinator, as configured or advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHostData {
    /// Hostname or IP clients connect to.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Logical server identity; doubles as the expected certificate name.
    pub identity: String,
    /// Whether the endpoint speaks TLS.
    pub ssl: bool,
    /// Free-form extra properties for custom locators.
    pub extra: HashMap<String, String>,
}

impl ServerHostData {
    /// Describe a server endpoint.
    pub fn new(host: impl Into<String>, port: u16, identity: impl Into<String>, ssl: bool) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
            ssl,
            extra: HashMap::new(),
        }
    }
}

/// A resolved, connectable address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host to dial.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub ssl: bool,
    /// Name presented for SNI when TLS is used.
    pub server_name: String,
}

impl ServerAddress {
    /// `host:port` form for the dialer.
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Strategy that resolves one reachable server address.
pub trait ServerLocator: Send + Sync {
    /// Resolve the coordinator's address.
    fn resolve(&self) -> CacheResult<ServerAddress>;
}

/// Locator for a statically known server endpoint.
#[derive(Debug, Clone)]
pub struct FixedServerLocator {
    host_data: ServerHostData,
}

impl FixedServerLocator {
    /// Wrap a static endpoint description.
    pub fn new(host_data: ServerHostData) -> Self {
        Self { host_data }
    }
}

impl ServerLocator for FixedServerLocator {
    fn resolve(&self) -> CacheResult<ServerAddress> {
        Ok(ServerAddress {
            host: self.host_data.host.clone(),
            port: self.host_data.port,
            ssl: self.host_data.ssl,
            server_name: self.host_data.host.clone(),
        })
    }
}
