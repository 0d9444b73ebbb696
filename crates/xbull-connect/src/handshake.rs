//! Session handshake for the wallet popup.
//!
//! The popup answers its opener with an `XBULL_INITIAL_RESPONSE` carrying its
//! box public key and `{"providedSession": <session id>}` encrypted to the
//! page's key. The page accepts the popup as its peer only when the decrypted
//! session id equals its own, byte for byte:
//!   `open(message, oneTimeCode, claimedKey, ourSecret).providedSession == sessionId`

use std::fmt;

use xbull_core::codec::{json_decode, json_encode};
use xbull_core::crypto::{CryptoSession, PeerKey};
use xbull_core::messages::{InitialResponse, SessionProof};
use xbull_core::ConnectResult;

/// Why a handshake response was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The claimed public key is not a valid box key.
    BadKey,
    /// The payload did not authenticate under the claimed key.
    Undecryptable,
    /// The plaintext was not a session proof.
    Malformed,
    /// The proof names another session.
    SessionMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::BadKey => "invalid sender public key",
            Self::Undecryptable => "payload failed to decrypt",
            Self::Malformed => "payload is not a session proof",
            Self::SessionMismatch => "session id does not match",
        };
        f.write_str(reason)
    }
}

/// Check a handshake response against our session.
///
/// On success the sender's claimed key is returned, to be pinned as the peer
/// identity for the current popup.
pub fn verify_initial_response(
    crypto: &CryptoSession,
    hello: &InitialResponse,
) -> Result<PeerKey, Rejection> {
    let claimed = PeerKey::from_base64(&hello.public_key).map_err(|_| Rejection::BadKey)?;

    let plaintext = crypto
        .decrypt_from_peer(&hello.message, &hello.one_time_code, &claimed)
        .map_err(|_| Rejection::Undecryptable)?;

    let proof: SessionProof = json_decode(&plaintext).map_err(|_| Rejection::Malformed)?;

    if proof.provided_session != crypto.session_id() {
        return Err(Rejection::SessionMismatch);
    }

    Ok(claimed)
}

/// Build the handshake response a wallet sends to the page that opened it.
pub fn build_initial_response(
    wallet: &CryptoSession,
    page_key: &PeerKey,
    session_id: &str,
) -> ConnectResult<InitialResponse> {
    let proof = json_encode(&SessionProof {
        provided_session: session_id.to_string(),
    })?;
    let sealed = wallet.encrypt_for_peer(&proof, page_key)?;

    Ok(InitialResponse {
        public_key: wallet.public_key_base64(),
        message: sealed.message,
        one_time_code: sealed.one_time_code,
    })
}
