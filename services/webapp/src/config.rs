//! Webapp configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Webapp configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address.
    pub listen_addr: SocketAddr,

    /// Directory for user uploads.
    pub upload_dir: PathBuf,

    /// Directory for generated sample files.
    pub download_dir: PathBuf,

    /// Session lifetime.
    pub session_ttl: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = std::env::var("MTD_WEBAPP_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("MTD_WEBAPP_LISTEN_ADDR must be a socket address")?;

        let upload_dir = std::env::var("MTD_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/app/uploads"));

        let download_dir = std::env::var("MTD_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/app/downloads"));

        let session_ttl_secs: u64 = std::env::var("MTD_SESSION_TTL")
            .ok()
            .map(|v| v.trim_end_matches('s').parse())
            .transpose()
            .context("MTD_SESSION_TTL must be a number of seconds")?
            .unwrap_or(3600);

        let log_level = std::env::var("MTD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            upload_dir,
            download_dir,
            session_ttl: Duration::from_secs(session_ttl_secs),
            log_level,
        })
    }
}
