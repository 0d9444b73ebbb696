//! Legacy in-app signer support.
//!
//! Older hosts (the xBull in-app browser) expose `connect(permissions)`,
//! `getPublicKey()` and `signXDR(xdr, opts)` instead of the
//! [`ExtensionBridge`] contract. [`InAppSdk`] speaks that event protocol over
//! an [`InAppHost`], and [`LegacyBridgeAdapter`] presents any
//! [`LegacyBridge`] as an `ExtensionBridge`, so the connector only ever
//! deals with one contract.

use std::future::Future;
use std::pin::Pin;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use xbull_core::messages::ConnectParams;
use xbull_core::transport::{
    AddressResponse, BridgeError, BridgeFuture, ExtensionBridge, SignTransactionRequest,
    SignedTransaction,
};
use xbull_core::ConnectResult;

/// Error code used for failures the legacy protocol reports without one.
pub const LEGACY_ERROR_CODE: i64 = -1;

const INVALID_PERMISSIONS: &str = "Value sent is not valid";
const UNEXPECTED_ERROR: &str = "Unexpected error";

/// Options accepted by [`LegacyBridge::sign_xdr`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignXdrOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// The legacy signer contract.
pub trait LegacyBridge: Send + Sync {
    /// Ask for site permissions; resolves with the permissions granted.
    fn connect(&self, permissions: ConnectParams) -> BridgeFuture<'_, ConnectParams>;

    fn get_public_key(&self) -> BridgeFuture<'_, String>;

    /// Sign a transaction envelope; resolves with the signed XDR.
    fn sign_xdr(&self, xdr: String, options: SignXdrOptions) -> BridgeFuture<'_, String>;
}

/// Presents a [`LegacyBridge`] as an [`ExtensionBridge`].
pub struct LegacyBridgeAdapter<B> {
    inner: B,
}

impl<B: LegacyBridge> LegacyBridgeAdapter<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: LegacyBridge> ExtensionBridge for LegacyBridgeAdapter<B> {
    fn get_address(&self) -> BridgeFuture<'_, AddressResponse> {
        Box::pin(async move {
            self.inner.connect(ConnectParams::default()).await?;
            let address = self.inner.get_public_key().await?;
            Ok(AddressResponse { address })
        })
    }

    fn sign_transaction(&self, request: SignTransactionRequest) -> BridgeFuture<'_, SignedTransaction> {
        Box::pin(async move {
            let signer_address = match request.opts.address.clone() {
                Some(address) => address,
                None => self.inner.get_public_key().await?,
            };
            let options = SignXdrOptions {
                network: request.opts.network_passphrase,
                public_key: request.opts.address,
            };
            let signed_tx_xdr = self.inner.sign_xdr(request.xdr, options).await?;
            Ok(SignedTransaction {
                signed_tx_xdr,
                signer_address,
            })
        })
    }
}

// ── In-app event protocol ───────────────────────────────────────────

/// Event names understood by the in-app host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InAppEvent {
    #[serde(rename = "XBULL_CONNECT")]
    Connect,
    #[serde(rename = "XBULL_GET_PUBLIC_KEY")]
    GetPublicKey,
    #[serde(rename = "XBULL_SIGN_XDR")]
    SignXdr,
}

/// One request to the in-app host: `{type, eventId, detail}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppRequest {
    #[serde(rename = "type")]
    pub event: InAppEvent,
    pub event_id: String,
    pub detail: Value,
}

/// Boxed future returned by [`InAppHost::send`].
pub type HostFuture<'a> = Pin<Box<dyn Future<Output = ConnectResult<Option<Value>>> + Send + 'a>>;

/// Carries in-app requests to the host and returns the `detail` of the
/// reply bearing the same `eventId`, if the reply had one.
pub trait InAppHost: Send + Sync {
    fn send(&self, request: InAppRequest) -> HostFuture<'_>;
}

/// Reply detail from the in-app host.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Page origin information sent with every in-app request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Origin<'a> {
    origin: &'a str,
    host: &'a str,
}

/// [`LegacyBridge`] over the in-app event protocol.
pub struct InAppSdk<H> {
    host: H,
    origin: String,
    host_name: String,
}

impl<H: InAppHost> InAppSdk<H> {
    /// `origin` and `host_name` identify the requesting page to the wallet.
    pub fn new(host: H, origin: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            host,
            origin: origin.into(),
            host_name: host_name.into(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, event: InAppEvent, extra: Value) -> Result<T, BridgeError> {
        let mut detail = serde_json::to_value(Origin {
            origin: &self.origin,
            host: &self.host_name,
        })
        .map_err(|e| BridgeError::new(LEGACY_ERROR_CODE, e.to_string()))?;
        if let (Some(detail), Value::Object(extra)) = (detail.as_object_mut(), extra) {
            detail.extend(extra);
        }

        let request = InAppRequest {
            event,
            event_id: new_event_id(),
            detail,
        };
        debug!(event = ?event, event_id = %request.event_id, "sending in-app event");

        let reply = self
            .host
            .send(request)
            .await
            .map_err(|e| BridgeError::new(LEGACY_ERROR_CODE, e.to_string()))?;

        let response = reply
            .map(serde_json::from_value::<RuntimeResponse>)
            .transpose()
            .map_err(|e| BridgeError::new(LEGACY_ERROR_CODE, e.to_string()))?;

        match response {
            Some(RuntimeResponse {
                error: false,
                payload: Some(payload),
                ..
            }) => serde_json::from_value(payload)
                .map_err(|e| BridgeError::new(LEGACY_ERROR_CODE, e.to_string())),
            Some(RuntimeResponse { error_message, .. }) => Err(BridgeError::new(
                LEGACY_ERROR_CODE,
                error_message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| UNEXPECTED_ERROR.to_string()),
            )),
            None => Err(BridgeError::new(LEGACY_ERROR_CODE, UNEXPECTED_ERROR)),
        }
    }
}

impl<H: InAppHost> LegacyBridge for InAppSdk<H> {
    fn connect(&self, permissions: ConnectParams) -> BridgeFuture<'_, ConnectParams> {
        Box::pin(async move {
            if !permissions.can_request_public_key && !permissions.can_request_sign {
                return Err(BridgeError::new(LEGACY_ERROR_CODE, INVALID_PERMISSIONS));
            }
            let extra = serde_json::json!({ "permissions": permissions });
            self.call(InAppEvent::Connect, extra).await
        })
    }

    fn get_public_key(&self) -> BridgeFuture<'_, String> {
        Box::pin(self.call(InAppEvent::GetPublicKey, Value::Null))
    }

    fn sign_xdr(&self, xdr: String, options: SignXdrOptions) -> BridgeFuture<'_, String> {
        Box::pin(async move {
            let mut extra = serde_json::to_value(&options)
                .map_err(|e| BridgeError::new(LEGACY_ERROR_CODE, e.to_string()))?;
            if let Some(map) = extra.as_object_mut() {
                map.insert("xdr".into(), Value::String(xdr));
            }
            self.call(InAppEvent::SignXdr, extra).await
        })
    }
}

fn new_event_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}
