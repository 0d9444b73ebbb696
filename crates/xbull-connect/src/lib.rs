//! xbull-connect: async client for xBull Wallet Connect.
//!
//! Lets a page obtain a wallet's public key and transaction signatures from
//! an xBull wallet running in a separate popup, over a transport the page
//! does not trust. The popup proves it was opened for this page's session,
//! every payload is boxed (curve25519-xsalsa20-poly1305), and each request is
//! resolved exactly once. When a trusted in-process signer is installed, calls
//! go to it directly.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use xbull_connect::{Capabilities, ConnectConfig, WalletConnect};
//! use xbull_connect::transport::memory::{MemoryChannel, MemoryOpener};
//! use xbull_core::{ConnectParams, SignParams};
//!
//! # async fn example() -> xbull_core::ConnectResult<()> {
//! let channel = MemoryChannel::new();
//! let (opener, _popups) = MemoryOpener::new(channel.clone());
//! let wallet = WalletConnect::new(
//!     ConnectConfig::default(),
//!     Capabilities::new(channel, opener),
//! )?;
//!
//! let public_key = wallet.connect(ConnectParams::default()).await?;
//! let signed = wallet.sign(SignParams::new("AAAA...")).await?;
//! println!("{public_key} signed {signed}");
//!
//! wallet.close_connections().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod extension;
pub mod handshake;
pub mod listener;
pub mod machine;
pub mod peer;
pub mod transport;
pub mod watchdog;

// Re-export primary public types.
pub use client::WalletConnect;
pub use config::{ConnectConfig, PreferredTarget, WindowFeatures};
pub use extension::{InAppHost, InAppSdk, LegacyBridge, LegacyBridgeAdapter};
pub use peer::{serve_popup, Decision, WalletPeer, WalletRequest};
pub use transport::Capabilities;

// Re-export xbull-core error types for convenience.
pub use xbull_core::{ConnectError, ConnectResult};
