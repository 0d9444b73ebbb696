//! CLI subcommand implementations.
//!
//! Every command runs the real connector against a simulated far side: a
//! wallet serving popups over the in-memory transport, and a simulated
//! extension bridge used when the preferred target is `extension`.

pub mod connect;
pub mod sign;
pub mod url;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use xbull_connect::transport::memory::{MemoryChannel, MemoryOpener, Popup};
use xbull_connect::{serve_popup, Capabilities, ConnectConfig, Decision, WalletConnect, WalletRequest};
use xbull_core::transport::{
    AddressResponse, BridgeError, BridgeFuture, ExtensionBridge, SignTransactionRequest,
    SignedTransaction,
};

/// Account the simulated wallet reports unless told otherwise.
pub const SIMULATED_ADDRESS: &str = "GBSIMULATEDWALLETXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX";

/// Error code the simulated extension uses when the user declines.
const USER_DECLINED: i64 = -4;

/// Stand-in for a signature: the simulator has no keys.
pub fn simulated_signature(xdr: &str, signer: &str) -> String {
    format!("{xdr}:signed-by:{signer}")
}

/// A trusted in-process signer that answers immediately.
pub struct SimulatedExtension {
    address: String,
    decline: bool,
}

impl SimulatedExtension {
    pub fn new(address: impl Into<String>, decline: bool) -> Self {
        Self {
            address: address.into(),
            decline,
        }
    }

    fn declined<T>(&self) -> Result<T, BridgeError> {
        Err(BridgeError::new(USER_DECLINED, "User declined access"))
    }
}

impl ExtensionBridge for SimulatedExtension {
    fn get_address(&self) -> BridgeFuture<'_, AddressResponse> {
        Box::pin(async move {
            if self.decline {
                return self.declined();
            }
            Ok(AddressResponse {
                address: self.address.clone(),
            })
        })
    }

    fn sign_transaction(&self, request: SignTransactionRequest) -> BridgeFuture<'_, SignedTransaction> {
        Box::pin(async move {
            if self.decline {
                return self.declined();
            }
            let signer_address = request.opts.address.unwrap_or_else(|| self.address.clone());
            Ok(SignedTransaction {
                signed_tx_xdr: simulated_signature(&request.xdr, &signer_address),
                signer_address,
            })
        })
    }
}

/// A connector wired to a simulated wallet.
pub struct Simulation {
    pub connector: WalletConnect,
    popups: mpsc::UnboundedReceiver<Popup>,
}

impl Simulation {
    pub fn start(config: ConnectConfig, extension: SimulatedExtension) -> Result<Self> {
        let channel = MemoryChannel::new();
        let (opener, popups) = MemoryOpener::new(channel.clone());
        let capabilities = Capabilities::new(channel, opener).with_bridge(Arc::new(extension));
        let connector = WalletConnect::new(config, capabilities).context("failed to start connector")?;
        Ok(Self { connector, popups })
    }

    /// Serve the next popup the connector opens, answering its request with
    /// `decide`. Resolves to `None` if no popup was ever opened.
    pub fn serve_next_popup<F>(&mut self, decide: F) -> JoinHandle<Result<Option<WalletRequest>>>
    where
        F: FnOnce(&WalletRequest) -> Decision + Send + 'static,
    {
        let (_, closed) = mpsc::unbounded_channel();
        let mut popups = std::mem::replace(&mut self.popups, closed);
        tokio::spawn(async move {
            let Some(popup) = popups.recv().await else {
                debug!("no popup was opened");
                return Ok(None);
            };
            debug!(url = %popup.url, "simulated wallet serving popup");
            Ok(serve_popup(popup, decide).await?)
        })
    }

    /// Shut the connector down and collect the simulated wallet's result.
    pub async fn finish(self, wallet: JoinHandle<Result<Option<WalletRequest>>>) -> Result<Option<WalletRequest>> {
        self.connector.close_connections().await;
        drop(self.connector);
        wallet.await.context("simulated wallet task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xbull_connect::PreferredTarget;
    use xbull_core::{ConnectParams, SignParams};

    fn config(target: PreferredTarget) -> ConnectConfig {
        ConnectConfig {
            preferred_target: target,
            watchdog_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn extension_target_never_opens_a_popup() {
        let mut sim = Simulation::start(
            config(PreferredTarget::Extension),
            SimulatedExtension::new("GEXT", false),
        )
        .unwrap();
        let wallet = sim.serve_next_popup(|_| Decision::Abandon);

        let signed = sim.connector.sign(SignParams::new("AAAA")).await.unwrap();
        assert_eq!(signed, "AAAA:signed-by:GEXT");
        assert!(sim.finish(wallet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn website_target_goes_through_the_popup() {
        let mut sim = Simulation::start(
            config(PreferredTarget::Website),
            SimulatedExtension::new("GEXT", false),
        )
        .unwrap();
        let wallet = sim.serve_next_popup(|_| Decision::Approve("GPOPUP".into()));

        let key = sim.connector.connect(ConnectParams::default()).await.unwrap();
        assert_eq!(key, "GPOPUP");
        assert!(sim.finish(wallet).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn declining_extension_passes_its_error_through() {
        let sim = Simulation::start(
            config(PreferredTarget::Extension),
            SimulatedExtension::new("GEXT", true),
        )
        .unwrap();
        let err = sim.connector.connect(ConnectParams::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "User declined access");
    }
}
