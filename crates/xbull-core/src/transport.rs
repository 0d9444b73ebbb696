//! Capability traits for the transports the connector talks through.
//!
//! Three independent capabilities are injected into the connector:
//! - [`MessageChannel`]: the shared raw inbound message stream (the page's
//!   `message` events). Foreign traffic is expected on it.
//! - [`WindowOpener`] / [`WalletWindow`]: opening and driving the wallet popup.
//! - [`ExtensionBridge`]: an already-trusted in-process signer that bypasses
//!   the encrypted handshake entirely.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectResult;

/// Identifier returned by [`MessageChannel::add_listener`].
pub type ListenerId = u64;

/// Callback invoked for every raw inbound message.
pub type MessageCallback = Box<dyn Fn(Value) + Send + Sync>;

/// The raw inbound transport shared with unrelated traffic.
pub trait MessageChannel: Send + Sync {
    /// Register a listener. Every inbound message is passed to `callback`.
    fn add_listener(&self, callback: MessageCallback) -> ListenerId;

    /// Remove a listener previously registered with `add_listener`.
    fn remove_listener(&self, id: ListenerId);
}

/// Opens wallet popups.
pub trait WindowOpener: Send + Sync {
    /// Open `url` in a window called `name` with the given feature string
    /// (`width=380,height=640,...`).
    fn open(&self, url: &str, name: &str, features: &str) -> ConnectResult<Box<dyn WalletWindow>>;
}

/// A handle to an opened wallet popup.
pub trait WalletWindow: Send + Sync {
    /// Post a message to the popup.
    fn post_message(&self, message: Value) -> ConnectResult<()>;

    /// Close the popup. Closing twice is a no-op.
    fn close(&self);

    /// Whether the popup has been closed, by us, by the user or by the system.
    ///
    /// Popups give no closure callback, so this is polled.
    fn is_closed(&self) -> bool;
}

/// Error returned by a trusted in-process transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Vec<String>>,
}

impl BridgeError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ext: None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BridgeError {}

/// Result of [`ExtensionBridge::get_address`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResponse {
    pub address: String,
}

/// Options passed along with a transaction to sign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Argument of [`ExtensionBridge::sign_transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTransactionRequest {
    pub xdr: String,
    pub opts: SignTransactionOptions,
}

/// Result of [`ExtensionBridge::sign_transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub signed_tx_xdr: String,
    pub signer_address: String,
}

/// Boxed future returned by bridge calls.
pub type BridgeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BridgeError>> + Send + 'a>>;

/// A trusted in-process signing capability (browser extension, in-app bridge).
pub trait ExtensionBridge: Send + Sync {
    /// Ask the signer for the active account address.
    fn get_address(&self) -> BridgeFuture<'_, AddressResponse>;

    /// Ask the signer to sign a transaction envelope.
    fn sign_transaction(&self, request: SignTransactionRequest) -> BridgeFuture<'_, SignedTransaction>;
}
