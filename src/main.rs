//! Entry point for the Payroll Engine binary.
//!
//! Running this binary starts an HTTP server exposing the payroll API.
//! Configuration is read from the TOML file named by `PAYROLL_CONFIG`
//! (default `payroll.toml`; built-in defaults apply when it does not
//! exist).  `PAYROLL_BIND_ADDR` overrides the configured bind address.

use std::path::PathBuf;

use anyhow::{Context, Result};
use payroll_engine::config::{AppConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("PAYROLL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("payroll.toml"));
    let mut config = if config_path.exists() {
        AppConfig::from_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        AppConfig::default()
    };
    if let Ok(addr) = std::env::var("PAYROLL_BIND_ADDR") {
        config.server.bind_addr = addr;
    }

    init_tracing(&config.logging);
    tracing::info!(config = %config_path.display(), "Starting payroll engine");

    payroll_engine::api::serve(config).await
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
