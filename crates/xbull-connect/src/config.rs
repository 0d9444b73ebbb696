//! Connector configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;
use xbull_core::{ConnectError, ConnectResult};

/// Hosted wallet endpoint used when no URL is configured.
pub const DEFAULT_WALLET_URL: &str = "https://wallet.xbull.app/connect";

/// Window name the popup is opened under.
pub const DEFAULT_WINDOW_NAME: &str = "xBull_Wallet_app";

/// Which transport `connect`/`sign` prefer when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferredTarget {
    /// Use the trusted in-process bridge when one is installed.
    #[default]
    Extension,
    /// Always go through the encrypted wallet popup.
    Website,
}

impl FromStr for PreferredTarget {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extension" => Ok(Self::Extension),
            "website" => Ok(Self::Website),
            other => Err(ConnectError::Config(format!(
                "unknown preferred target '{other}' (expected 'extension' or 'website')"
            ))),
        }
    }
}

impl fmt::Display for PreferredTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extension => f.write_str("extension"),
            Self::Website => f.write_str("website"),
        }
    }
}

/// Popup geometry. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFeatures {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
}

impl Default for WindowFeatures {
    fn default() -> Self {
        Self {
            width: 380,
            height: 640,
            left: 100,
            top: 100,
        }
    }
}

impl fmt::Display for WindowFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "width={},height={},left={},top={}",
            self.width, self.height, self.left, self.top
        )
    }
}

/// Configuration for a [`WalletConnect`](crate::WalletConnect).
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Wallet connect page opened in the popup.
    pub wallet_url: String,
    /// Transport preference.
    pub preferred_target: PreferredTarget,
    /// How often the popup's liveness is polled.
    pub watchdog_interval: Duration,
    /// Popup geometry.
    pub window: WindowFeatures,
    /// Popup window name.
    pub window_name: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            wallet_url: DEFAULT_WALLET_URL.to_string(),
            preferred_target: PreferredTarget::default(),
            watchdog_interval: Duration::from_millis(1000),
            window: WindowFeatures::default(),
            window_name: DEFAULT_WINDOW_NAME.to_string(),
        }
    }
}

impl ConnectConfig {
    /// Check the configuration and return the parsed wallet URL.
    pub fn validate(&self) -> ConnectResult<Url> {
        if self.watchdog_interval.is_zero() {
            return Err(ConnectError::Config("watchdog interval must be non-zero".into()));
        }
        Url::parse(&self.wallet_url)
            .map_err(|e| ConnectError::Config(format!("invalid wallet url '{}': {e}", self.wallet_url)))
    }
}
