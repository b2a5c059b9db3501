//! CLI command implementations.

use crate::core::config::Config;
use crate::net::locator::ServerHostData;
use crate::net::tls::SecurityOptions;
use crate::server::CacheServer;
use anyhow::{Context, Result};
use std::path::Path;

/// Run the coordinating server until interrupted.
pub async fn run_serve(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.telemetry.log_level.clone().into()),
        )
        .init();

    let host_data = ServerHostData::new(
        config.server.host.clone(),
        config.server.port,
        config.server.host.clone(),
        config.server.ssl,
    );
    let server = CacheServer::with_config(
        config.server.shared_secret.clone(),
        host_data,
        config.limits.clone(),
    );

    if config.server.ssl {
        server
            .setup_security(SecurityOptions {
                certificate_file: config.security.certificate_file.clone().map(Into::into),
                certificate_password: config.security.certificate_password.clone(),
                certificate_chain_file: config
                    .security
                    .certificate_chain_file
                    .clone()
                    .map(Into::into),
                trust_store_file: config.security.trust_store_file.clone().map(Into::into),
            })
            .context("failed to bind TLS material")?;
    }

    let addr = server.start().await.context("failed to start server")?;
    tracing::info!(%addr, "embercache serving; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    server.close().await;
    Ok(())
}

/// Parse and validate the configuration file.
pub fn run_config_validate(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    println!(
        "ok: {} ({}:{}, ssl={})",
        config_path.display(),
        config.server.host,
        config.server.port,
        config.server.ssl
    );
    Ok(())
}
