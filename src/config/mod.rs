//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`S5B_*`)
//! - CLI arguments (for the `s5b` binary)

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, S5bError};
use crate::protocol::Jid;
use crate::stream::StreamSettings;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Defaults for new sessions
    #[serde(default)]
    pub stream: StreamSettings,

    /// Local accept listener
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| S5bError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| S5bError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`~/.config/s5b/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("s5b").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Override this config with whatever `S5B_*` variables are set.
    ///
    /// Only variables that are present replace a value, so an explicit
    /// `S5B_DIRECT_DISABLED=0` re-enables direct connections a file turned off.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(self, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = self;

        // Stream settings
        if let Some(val) = var("S5B_CONNECT_TIMEOUT_MS") {
            match val.parse() {
                Ok(ms) if StreamSettings::is_valid_connect_timeout(ms) => {
                    config.stream.connect_timeout_ms = ms
                },
                _ => tracing::warn!("Ignoring S5B_CONNECT_TIMEOUT_MS={}", val),
            }
        }
        if let Some(val) = var("S5B_DIRECT_DISABLED") {
            config.stream.direct_connections_disabled = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Some(host) = var("S5B_FORWARD_HOST") {
            config.stream.forward_host = host;
        }
        if let Some(port) = var("S5B_FORWARD_PORT") {
            if let Ok(port) = port.parse() {
                config.stream.forward_port = port;
            }
        }
        if let Some(proxies) = var("S5B_PROXIES") {
            config.stream.proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(Jid::from)
                .collect();
        }
        if let Some(proxy) = var("S5B_NETWORK_PROXY") {
            match proxy.parse() {
                Ok(proxy) => config.stream.network_proxy = proxy,
                Err(e) => tracing::warn!("Ignoring S5B_NETWORK_PROXY: {}", e),
            }
        }

        // Listener settings
        if let Some(host) = var("S5B_LISTEN_HOST") {
            config.listener.host = host;
        }
        if let Some(port) = var("S5B_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                config.listener.port = port;
            }
        }

        config
    }

    /// Reject values a session would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if !StreamSettings::is_valid_connect_timeout(self.stream.connect_timeout_ms) {
            return Err(S5bError::Config(format!(
                "connect_timeout_ms must be above 100, got {}",
                self.stream.connect_timeout_ms
            )));
        }
        self.listener.socket_addr()?;
        Ok(())
    }
}

/// Local accept listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

impl ListenerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Listen address as a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr()
            .parse()
            .map_err(|e| S5bError::Config(format!("Invalid listen address {}: {e}", self.listen_addr())))
    }
}
