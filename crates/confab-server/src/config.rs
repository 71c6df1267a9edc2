//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the gateway can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.  When unset, the platform data directory is
    /// used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Seconds an unanswered ring is allowed to last before the call is
    /// marked missed.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: `30`
    pub ring_timeout_secs: u64,

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Confab Node"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            ring_timeout_secs: 30,
            instance_name: "Confab Node".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("RING_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.ring_timeout_secs = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid RING_TIMEOUT_SECS, using default");
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.ring_timeout_secs, 30);
        assert!(config.db_path.is_none());
    }
}
