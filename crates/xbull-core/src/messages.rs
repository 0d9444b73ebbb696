//! Wire envelopes exchanged between the page and the wallet popup.
//!
//! Every envelope is a JSON object tagged by `type`. Encrypted envelopes carry
//! base64 `message` (box ciphertext) and `oneTimeCode` (24-byte nonce).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Envelope type tags. Must match the wallet's event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "XBULL_INITIAL_RESPONSE")]
    InitialResponse,
    #[serde(rename = "XBULL_CONNECT")]
    Connect,
    #[serde(rename = "XBULL_CONNECT_RESPONSE")]
    ConnectResponse,
    #[serde(rename = "XBULL_SIGN")]
    Sign,
    #[serde(rename = "XBULL_SIGN_RESPONSE")]
    SignResponse,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialResponse => "XBULL_INITIAL_RESPONSE",
            Self::Connect => "XBULL_CONNECT",
            Self::ConnectResponse => "XBULL_CONNECT_RESPONSE",
            Self::Sign => "XBULL_SIGN",
            Self::SignResponse => "XBULL_SIGN_RESPONSE",
        }
    }

    /// Parse a raw `type` tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "XBULL_INITIAL_RESPONSE" => Some(Self::InitialResponse),
            "XBULL_CONNECT" => Some(Self::Connect),
            "XBULL_CONNECT_RESPONSE" => Some(Self::ConnectResponse),
            "XBULL_SIGN" => Some(Self::Sign),
            "XBULL_SIGN_RESPONSE" => Some(Self::SignResponse),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two high-level operations a page can ask the wallet for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Sign,
}

impl OperationKind {
    /// Envelope type of the page -> wallet request.
    pub fn request_type(&self) -> EventType {
        match self {
            Self::Connect => EventType::Connect,
            Self::Sign => EventType::Sign,
        }
    }

    /// Envelope type of the wallet -> page response.
    pub fn response_type(&self) -> EventType {
        match self {
            Self::Connect => EventType::ConnectResponse,
            Self::Sign => EventType::SignResponse,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Sign => f.write_str("sign"),
        }
    }
}

/// A complete wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "XBULL_INITIAL_RESPONSE")]
    InitialResponse(InitialResponse),
    #[serde(rename = "XBULL_CONNECT")]
    Connect(EncryptedRequest),
    #[serde(rename = "XBULL_CONNECT_RESPONSE")]
    ConnectResponse(WalletResponse),
    #[serde(rename = "XBULL_SIGN")]
    Sign(EncryptedRequest),
    #[serde(rename = "XBULL_SIGN_RESPONSE")]
    SignResponse(WalletResponse),
}

impl Envelope {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::InitialResponse(_) => EventType::InitialResponse,
            Self::Connect(_) => EventType::Connect,
            Self::ConnectResponse(_) => EventType::ConnectResponse,
            Self::Sign(_) => EventType::Sign,
            Self::SignResponse(_) => EventType::SignResponse,
        }
    }

    /// Wrap an encrypted request in the envelope matching `kind`.
    pub fn request(kind: OperationKind, request: EncryptedRequest) -> Self {
        match kind {
            OperationKind::Connect => Self::Connect(request),
            OperationKind::Sign => Self::Sign(request),
        }
    }

    /// Wrap a wallet response in the envelope matching `kind`.
    pub fn response(kind: OperationKind, response: WalletResponse) -> Self {
        match kind {
            OperationKind::Connect => Self::ConnectResponse(response),
            OperationKind::Sign => Self::SignResponse(response),
        }
    }
}

/// Handshake response: the wallet proves it was opened for our session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialResponse {
    /// Sender's claimed box public key (base64). Untrusted until the session
    /// proof inside `message` checks out.
    pub public_key: String,
    pub message: String,
    pub one_time_code: String,
}

/// An encrypted page -> wallet request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRequest {
    pub message: String,
    pub one_time_code: String,
}

/// A wallet -> page response.
///
/// With `success: true`, `message`/`oneTimeCode` carry the encrypted result.
/// With `success: false`, `message` is an optional plaintext reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_code: Option<String>,
    /// Plaintext correlation id, only meaningful on rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// ── Encrypted payloads ──────────────────────────────────────────────

/// Plaintext of the handshake response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProof {
    pub provided_session: String,
}

/// Permissions requested by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub can_request_public_key: bool,
    pub can_request_sign: bool,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            can_request_public_key: true,
            can_request_sign: true,
        }
    }
}

/// Transaction to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignParams {
    pub xdr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl SignParams {
    pub fn new(xdr: impl Into<String>) -> Self {
        Self {
            xdr: xdr.into(),
            public_key: None,
            network: None,
        }
    }
}

/// Plaintext body of a page -> wallet request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Connect(ConnectParams),
    Sign(SignParams),
}

impl RequestBody {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Connect(_) => OperationKind::Connect,
            Self::Sign(_) => OperationKind::Sign,
        }
    }
}

/// Decrypted result of an accepted connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    pub public_key: String,
}

/// Decrypted result of an accepted sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutcome {
    pub xdr: String,
}

/// An encrypted payload tagged with an optional correlation id.
///
/// The id is flattened next to the payload's own fields, so wallets that do
/// not know about it simply see one more key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlated<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> Correlated<T> {
    pub fn new(body: T, request_id: Option<String>) -> Self {
        Self { body, request_id }
    }
}
