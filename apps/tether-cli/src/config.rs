//! Client configuration.
//!
//! Stored as TOML at `$TETHER_CONFIG` when set, otherwise:
//! - Linux: `~/.config/tether/tether.toml`
//! - Windows: `%APPDATA%/tether/tether.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_connection::{DEFAULT_CONNECT_TIMEOUT, ManagerOptions, RetryOverrides};
use tether_transport::TransportOptions;

const CONFIG_ENV: &str = "TETHER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint to hold a connection to.
    #[serde(default = "default_url")]
    pub url: String,

    /// Handshake deadline per attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Overrides for the initial attempt backoff.
    #[serde(default)]
    pub retry: RetryOverrides,

    /// Passed to the WebSocket transport as-is.
    #[serde(default)]
    pub transport: TransportOptions,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080".into()
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry: RetryOverrides::default(),
            transport: TransportOptions::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The transport section may carry an auth token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions::new(self.url.clone())
            .with_retry_overrides(&self.retry)
            .with_transport_options(self.transport.clone())
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("tether").join("tether.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tether")
            .join("tether.toml"))
    }
}
