use thiserror::Error;

use crate::transport::BridgeError;

/// Errors produced by the wallet connect protocol layer.
///
/// `PreconditionFailed` and `PeerRejected` display their message unchanged so
/// callers can show it to the user as-is.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    PeerRejected(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The trusted in-process transport failed; its error is passed through.
    #[error(transparent)]
    Delegate(#[from] BridgeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ConnectError {
    fn from(e: serde_json::Error) -> Self {
        ConnectError::Codec(e.to_string())
    }
}

impl From<base64::DecodeError> for ConnectError {
    fn from(e: base64::DecodeError) -> Self {
        ConnectError::Codec(format!("base64: {e}"))
    }
}

pub type ConnectResult<T> = Result<T, ConnectError>;
