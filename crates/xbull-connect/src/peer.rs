//! The wallet's side of the protocol.
//!
//! `WalletPeer` is what the popup runs: it reads the page's public key and
//! session id from the popup URL, proves it was opened for that session, and
//! answers encrypted connect/sign requests. The simulator binary and the
//! connector's tests use it as the far end.

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use xbull_core::codec::{decode_envelope, json_decode, json_encode};
use xbull_core::crypto::{CryptoSession, PeerKey};
use xbull_core::messages::{
    ConnectOutcome, ConnectParams, Correlated, EncryptedRequest, Envelope, OperationKind, RequestBody,
    SignOutcome, SignParams, WalletResponse,
};
use xbull_core::{ConnectError, ConnectResult};

use crate::handshake::build_initial_response;
use crate::transport::memory::Popup;

/// A decrypted page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRequest {
    pub request_id: Option<String>,
    pub body: RequestBody,
}

impl WalletRequest {
    pub fn kind(&self) -> OperationKind {
        self.body.kind()
    }
}

/// Wallet-side session bound to one page.
pub struct WalletPeer {
    crypto: CryptoSession,
    page_key: PeerKey,
    session_id: String,
}

impl WalletPeer {
    pub fn new(page_key: PeerKey, session_id: impl Into<String>) -> Self {
        Self {
            crypto: CryptoSession::generate(),
            page_key,
            session_id: session_id.into(),
        }
    }

    /// Read `public` and `session` from the URL the popup was opened with.
    pub fn from_popup_url(url: &str) -> ConnectResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ConnectError::InvalidMessage(format!("invalid popup url: {e}")))?;

        let mut public = None;
        let mut session = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "public" => public = Some(value.into_owned()),
                "session" => session = Some(value.into_owned()),
                _ => {}
            }
        }

        let public = public
            .ok_or_else(|| ConnectError::InvalidMessage("popup url has no 'public' parameter".into()))?;
        let session = session
            .ok_or_else(|| ConnectError::InvalidMessage("popup url has no 'session' parameter".into()))?;

        Ok(Self::new(PeerKey::from_base64(&public)?, session))
    }

    pub fn public_key_base64(&self) -> String {
        self.crypto.public_key_base64()
    }

    /// The session id the page advertised.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handshake response for the advertised session.
    pub fn initial_response(&self) -> ConnectResult<Envelope> {
        self.initial_response_for(&self.session_id)
    }

    /// Handshake response naming an arbitrary session.
    pub fn initial_response_for(&self, session_id: &str) -> ConnectResult<Envelope> {
        let hello = build_initial_response(&self.crypto, &self.page_key, session_id)?;
        Ok(Envelope::InitialResponse(hello))
    }

    /// Decrypt a page request.
    pub fn open_request(&self, envelope: &Envelope) -> ConnectResult<WalletRequest> {
        match envelope {
            Envelope::Connect(request) => {
                let payload: Correlated<ConnectParams> = self.open(request)?;
                Ok(WalletRequest {
                    request_id: payload.request_id,
                    body: RequestBody::Connect(payload.body),
                })
            }
            Envelope::Sign(request) => {
                let payload: Correlated<SignParams> = self.open(request)?;
                Ok(WalletRequest {
                    request_id: payload.request_id,
                    body: RequestBody::Sign(payload.body),
                })
            }
            other => Err(ConnectError::InvalidMessage(format!(
                "expected a page request, got {}",
                other.event_type()
            ))),
        }
    }

    /// Decode and decrypt a raw message posted by the page.
    pub fn open_raw_request(&self, raw: &Value) -> ConnectResult<WalletRequest> {
        let envelope = decode_envelope(raw)?
            .ok_or_else(|| ConnectError::InvalidMessage("not an xBull message".into()))?;
        self.open_request(&envelope)
    }

    /// Accept `request` with `result` (public key for connect, signed XDR for
    /// sign), echoing its correlation id.
    pub fn approve(&self, request: &WalletRequest, result: &str) -> ConnectResult<Envelope> {
        self.accept(request.kind(), result, request.request_id.clone())
    }

    /// Accept without a correlation id, as wallets unaware of it do.
    pub fn approve_uncorrelated(&self, kind: OperationKind, result: &str) -> ConnectResult<Envelope> {
        self.accept(kind, result, None)
    }

    /// Decline an operation of `kind`.
    pub fn reject(&self, kind: OperationKind, message: Option<&str>) -> Envelope {
        Envelope::response(
            kind,
            WalletResponse {
                success: false,
                message: message.map(str::to_string),
                one_time_code: None,
                request_id: None,
            },
        )
    }

    /// Decline `request`, echoing its correlation id in plaintext.
    pub fn reject_request(&self, request: &WalletRequest, message: Option<&str>) -> Envelope {
        let mut envelope = self.reject(request.kind(), message);
        if let Envelope::ConnectResponse(r) | Envelope::SignResponse(r) = &mut envelope {
            r.request_id = request.request_id.clone();
        }
        envelope
    }

    fn accept(&self, kind: OperationKind, result: &str, request_id: Option<String>) -> ConnectResult<Envelope> {
        let plaintext = match kind {
            OperationKind::Connect => json_encode(&Correlated::new(
                ConnectOutcome {
                    public_key: result.to_string(),
                },
                request_id,
            ))?,
            OperationKind::Sign => json_encode(&Correlated::new(
                SignOutcome {
                    xdr: result.to_string(),
                },
                request_id,
            ))?,
        };
        let sealed = self.crypto.encrypt_for_peer(&plaintext, &self.page_key)?;
        Ok(Envelope::response(
            kind,
            WalletResponse {
                success: true,
                message: Some(sealed.message),
                one_time_code: Some(sealed.one_time_code),
                request_id: None,
            },
        ))
    }

    fn open<T: serde::de::DeserializeOwned>(&self, request: &EncryptedRequest) -> ConnectResult<T> {
        let plaintext = self
            .crypto
            .decrypt_from_peer(&request.message, &request.one_time_code, &self.page_key)?;
        json_decode(&plaintext)
    }
}

/// What the simulated user does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Accept with this result.
    Approve(String),
    /// Decline, optionally saying why.
    Reject(Option<String>),
    /// Close the popup without answering.
    Abandon,
}

/// Run a simulated wallet in `popup`: handshake, then answer the first
/// request with whatever `decide` returns.
///
/// Returns the request that was answered, or `None` if the page closed the
/// popup first.
pub async fn serve_popup<F>(mut popup: Popup, decide: F) -> ConnectResult<Option<WalletRequest>>
where
    F: FnOnce(&WalletRequest) -> Decision,
{
    let wallet = WalletPeer::from_popup_url(&popup.url)?;
    popup.post(&wallet.initial_response()?)?;
    debug!(session = wallet.session_id(), "wallet sent handshake response");

    let Some(raw) = popup.recv().await else {
        debug!("page closed the popup before sending a request");
        return Ok(None);
    };
    let request = wallet.open_raw_request(&raw)?;
    info!(kind = %request.kind(), request_id = ?request.request_id, "wallet received request");

    match decide(&request) {
        Decision::Approve(result) => popup.post(&wallet.approve(&request, &result)?)?,
        Decision::Reject(message) => popup.post(&wallet.reject_request(&request, message.as_deref()))?,
        Decision::Abandon => popup.close(),
    }
    Ok(Some(request))
}
