//! Configuration loading and persistence.
//!
//! Handles reading and writing the client configuration file and deriving
//! the [`ClientConfig`] the channel service runs with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::channel::{ClientConfig, ReconnectPolicy};
use crate::constants::{
    DEFAULT_SERVER_URL, HEARTBEAT_INTERVAL, LIVE_UPDATES_PATH, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY,
};

/// Name of the configuration file inside [`Config::config_dir`].
const CONFIG_FILE: &str = "config.json";

/// Configuration for the live-updates client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Origin of the dashboard API (`http(s)://` or `ws(s)://`).
    pub server_url: String,
    /// Path of the WebSocket endpoint on that origin.
    pub endpoint_path: String,
    /// Seconds between heartbeat pings while connected.
    pub heartbeat_interval_secs: u64,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Upper bound on any reconnect delay, in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Whether a failure to even create the connection is retried.
    pub retry_on_connect_failure: bool,
    /// Event kinds to subscribe to after each successful open.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            endpoint_path: LIVE_UPDATES_PATH.to_string(),
            heartbeat_interval_secs: HEARTBEAT_INTERVAL.as_secs(),
            reconnect_base_delay_ms: RECONNECT_BASE_DELAY.as_millis() as u64,
            reconnect_max_delay_ms: RECONNECT_MAX_DELAY.as_millis() as u64,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            retry_on_connect_failure: false,
            subscriptions: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/carehome-test`
    /// 2. `CAREHOME_CONFIG_DIR` env var: explicit override
    /// 3. `CAREHOME_ENV=test`: `tmp/carehome-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/carehome-live)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                // Unit tests: use repo's tmp/ directory
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/carehome-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("CAREHOME_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/carehome-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("carehome-live")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads a configuration file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("CAREHOME_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(path) = std::env::var("CAREHOME_ENDPOINT_PATH") {
            self.endpoint_path = path;
        }

        if let Ok(interval) = std::env::var("CAREHOME_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.heartbeat_interval_secs = secs;
            }
        }

        if let Ok(attempts) = std::env::var("CAREHOME_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(max) = attempts.parse::<u32>() {
                self.max_reconnect_attempts = max;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Writes the configuration to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Full WebSocket URL of the configured endpoint.
    pub fn endpoint_url(&self) -> String {
        crate::ws::endpoint_url(&self.server_url, &self.endpoint_path)
    }

    /// Reconnect policy described by this configuration.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Settings for the channel client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.endpoint_url(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            policy: self.reconnect_policy(),
            retry_on_connect_failure: self.retry_on_connect_failure,
            subscriptions: self.subscriptions.clone(),
        }
    }
}
