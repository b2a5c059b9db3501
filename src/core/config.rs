//! Configuration parsing and validation.
//!
//! The server binary loads a TOML file; library users construct the typed
//! config structs directly. Tunables default to values suitable for a LAN
//! deployment and every duration is expressed in milliseconds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default maximum wire frame size (value payloads included).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Server-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How long the coordinator waits for a holder to ack an invalidation
    /// before demoting it from the holder set.
    #[serde(default = "default_invalidation_timeout_ms")]
    pub invalidation_timeout_ms: u64,

    /// Sessions with no inbound traffic for this long are closed.
    #[serde(default = "default_session_idle_timeout_ms")]
    pub session_idle_timeout_ms: u64,

    /// Maximum accepted frame size.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            invalidation_timeout_ms: default_invalidation_timeout_ms(),
            session_idle_timeout_ms: default_session_idle_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ServerConfig {
    /// Invalidation barrier timeout as a [`Duration`].
    pub fn invalidation_timeout(&self) -> Duration {
        Duration::from_millis(self.invalidation_timeout_ms)
    }

    /// Session idle timeout as a [`Duration`].
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }
}

/// Client-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Deadline for connect + register during `start()`.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for each put/get/invalidate round trip.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Interval between heartbeats sent to the server.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Maximum accepted frame size.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ClientConfig {
    /// Connect deadline as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// RPC deadline as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Top-level configuration for the `embercache serve` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint and identity of the coordinator.
    pub server: ServerSection,

    /// TLS material. Only consulted when `server.ssl` is true.
    #[serde(default)]
    pub security: SecuritySection,

    /// Timeouts and limits.
    #[serde(default)]
    pub limits: ServerConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Hostname advertised to clients and used as the certificate CN for
    /// ephemeral self-signed material.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Shared secret clients must present on REGISTER.
    pub shared_secret: String,

    /// Whether the listener speaks TLS.
    #[serde(default)]
    pub ssl: bool,
}

/// `[security]` section, mirroring [`crate::net::tls::SecurityOptions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySection {
    /// PEM file with the server certificate (and optionally its key).
    #[serde(default)]
    pub certificate_file: Option<String>,

    /// Password for encrypted key material.
    #[serde(default)]
    pub certificate_password: Option<String>,

    /// PEM file with the certificate chain, when separate.
    #[serde(default)]
    pub certificate_chain_file: Option<String>,

    /// PEM bundle of trusted CAs (client side).
    #[serde(default)]
    pub trust_store_file: Option<String>,
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// Log filter, e.g. "info" or "embercache=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.server.shared_secret.is_empty() {
            anyhow::bail!("server.shared_secret must not be empty");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("server.host must not be empty");
        }
        if self.limits.invalidation_timeout_ms == 0 {
            anyhow::bail!("limits.invalidation_timeout_ms must be positive");
        }
        if !self.server.ssl
            && (self.security.certificate_file.is_some()
                || self.security.certificate_chain_file.is_some())
        {
            anyhow::bail!("security.certificate_file set but server.ssl is false");
        }
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_invalidation_timeout_ms() -> u64 {
    10_000
}

fn default_session_idle_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 1234
shared_secret = "ciao"
"#,
        )
        .expect("should parse");
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 1234);
        assert!(!config.server.ssl);
        assert_eq!(config.limits.invalidation_timeout_ms, 10_000);
        config.validate().expect("should validate");
    }

    #[test]
    fn test_empty_secret_rejected() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 1234
shared_secret = ""
"#,
        )
        .expect("should parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cert_without_ssl_rejected() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 1234
shared_secret = "ciao"

[security]
certificate_file = "cert.pem"
"#,
        )
        .expect("should parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let limits = ServerConfig::default();
        assert_eq!(limits.invalidation_timeout(), Duration::from_secs(10));
        let client = ClientConfig::default();
        assert_eq!(client.heartbeat_interval(), Duration::from_secs(5));
    }
}
