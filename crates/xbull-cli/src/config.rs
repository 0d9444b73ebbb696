//! Simulator configuration at `~/.xbull/config.toml`.
//!
//! Provides default wallet URL, transport preference and watchdog interval.
//! CLI flags always override config file values.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use xbull_connect::config::DEFAULT_WALLET_URL;
use xbull_connect::{ConnectConfig, PreferredTarget};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Wallet connect page opened in the popup.
    #[serde(default = "default_wallet_url")]
    pub wallet_url: String,

    /// Transport preference: "extension" or "website".
    #[serde(default = "default_preferred_target")]
    pub preferred_target: String,

    /// Popup liveness poll interval.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            wallet_url: default_wallet_url(),
            preferred_target: default_preferred_target(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
        }
    }
}

fn default_wallet_url() -> String {
    DEFAULT_WALLET_URL.to_string()
}

// The simulator exists to exercise the popup, so it goes there unless told otherwise.
fn default_preferred_target() -> String {
    "website".to_string()
}

fn default_watchdog_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Connector configuration described by this file.
    pub fn to_connect_config(&self) -> Result<ConnectConfig> {
        let preferred_target = self
            .default
            .preferred_target
            .parse::<PreferredTarget>()
            .context("invalid preferred_target in config")?;

        Ok(ConnectConfig {
            wallet_url: self.default.wallet_url.clone(),
            preferred_target,
            watchdog_interval: Duration::from_millis(self.default.watchdog_interval_ms),
            ..Default::default()
        })
    }
}
