//! Ephemeral box session: curve25519-xsalsa20-poly1305.
//!
//! A `CryptoSession` owns one X25519 keypair and a random session id for the
//! lifetime of a connector. The secret key never leaves this type; callers
//! only get ciphertext out and authenticated plaintext back.

use std::fmt;

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::codec::{b64_decode, b64_encode};
use crate::error::{ConnectError, ConnectResult};

/// Length of a box public key.
pub const KEY_LEN: usize = 32;
/// Length of a box nonce (the "one-time code").
pub const NONCE_LEN: usize = 24;
/// Random bytes behind a session id.
pub const SESSION_ID_LEN: usize = 24;

/// A counterpart's box public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey([u8; KEY_LEN]);

impl PeerKey {
    pub fn from_bytes(bytes: &[u8]) -> ConnectResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ConnectError::InvalidMessage(format!(
                "invalid public key length: expected {KEY_LEN}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_base64(encoded: &str) -> ConnectResult<Self> {
        Self::from_bytes(&b64_decode(encoded)?)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        b64_encode(&self.0)
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", hex::encode(&self.0[..8]))
    }
}

/// Ciphertext and nonce, both base64, as carried in `message`/`oneTimeCode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub message: String,
    pub one_time_code: String,
}

/// Ephemeral keypair plus session id.
pub struct CryptoSession {
    secret: SecretKey,
    public: PublicKey,
    session_id: String,
}

impl CryptoSession {
    /// Generate a fresh keypair and a 24-byte random session id.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();

        let mut session = [0u8; SESSION_ID_LEN];
        OsRng.fill_bytes(&mut session);

        Self {
            secret,
            public,
            session_id: b64_encode(&session),
        }
    }

    /// Our public key.
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        *self.public.as_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        b64_encode(self.public.as_bytes())
    }

    /// The session id. Returned by value; the session itself is immutable.
    pub fn session_id(&self) -> String {
        self.session_id.clone()
    }

    /// Authenticate and encrypt `plaintext` for `peer` under a fresh nonce.
    pub fn encrypt_for_peer(&self, plaintext: &str, peer: &PeerKey) -> ConnectResult<Sealed> {
        let cipher = self.cipher_for(peer);
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| ConnectError::Codec("box encryption failed".into()))?;

        Ok(Sealed {
            message: b64_encode(&ciphertext),
            one_time_code: b64_encode(nonce.as_slice()),
        })
    }

    /// Verify and decrypt a message from `peer`.
    ///
    /// Any failure (tampering, wrong key, wrong nonce, bad encoding) is a
    /// `DecryptionFailed`; unauthenticated bytes are never returned.
    pub fn decrypt_from_peer(
        &self,
        message: &str,
        one_time_code: &str,
        peer: &PeerKey,
    ) -> ConnectResult<String> {
        let ciphertext = b64_decode(message)
            .map_err(|e| ConnectError::DecryptionFailed(format!("ciphertext: {e}")))?;
        let nonce = b64_decode(one_time_code)
            .map_err(|e| ConnectError::DecryptionFailed(format!("one-time code: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(ConnectError::DecryptionFailed(format!(
                "one-time code must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }

        let plaintext = self
            .cipher_for(peer)
            .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| ConnectError::DecryptionFailed("message authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| ConnectError::DecryptionFailed("plaintext is not valid UTF-8".into()))
    }

    fn cipher_for(&self, peer: &PeerKey) -> SalsaBox {
        SalsaBox::new(&PublicKey::from(*peer.as_bytes()), &self.secret)
    }
}

impl fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoSession")
            .field("public", &hex::encode(&self.public.as_bytes()[..8]))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (CryptoSession, CryptoSession) {
        (CryptoSession::generate(), CryptoSession::generate())
    }

    fn key_of(s: &CryptoSession) -> PeerKey {
        PeerKey::from_bytes(&s.public_key()).unwrap()
    }

    #[test]
    fn round_trip_between_two_sessions() {
        let (a, b) = pair();
        for plaintext in ["", "This is a test message", "{\"providedSession\":\"x\"}", "żółw ✓"] {
            let sealed = a.encrypt_for_peer(plaintext, &key_of(&b)).unwrap();
            let opened = b
                .decrypt_from_peer(&sealed.message, &sealed.one_time_code, &key_of(&a))
                .unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn ciphertext_differs_from_plaintext_and_nonce_is_fresh() {
        let (a, b) = pair();
        let first = a.encrypt_for_peer("same text", &key_of(&b)).unwrap();
        let second = a.encrypt_for_peer("same text", &key_of(&b)).unwrap();
        assert_ne!(first.one_time_code, second.one_time_code);
        assert_ne!(first.message, second.message);
        assert_eq!(b64_decode(&first.one_time_code).unwrap().len(), NONCE_LEN);
    }

    #[test]
    fn flipped_ciphertext_bit_fails() {
        let (a, b) = pair();
        let sealed = a.encrypt_for_peer("sign this", &key_of(&b)).unwrap();
        let raw = b64_decode(&sealed.message).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let err = b
                .decrypt_from_peer(&b64_encode(&tampered), &sealed.one_time_code, &key_of(&a))
                .unwrap_err();
            assert!(matches!(err, ConnectError::DecryptionFailed(_)));
        }
    }

    #[test]
    fn flipped_nonce_bit_fails() {
        let (a, b) = pair();
        let sealed = a.encrypt_for_peer("sign this", &key_of(&b)).unwrap();
        let mut nonce = b64_decode(&sealed.one_time_code).unwrap();
        nonce[NONCE_LEN - 1] ^= 0x80;

        let err = b
            .decrypt_from_peer(&sealed.message, &b64_encode(&nonce), &key_of(&a))
            .unwrap_err();
        assert!(matches!(err, ConnectError::DecryptionFailed(_)));
    }

    #[test]
    fn wrong_sender_key_fails() {
        let (a, b) = pair();
        let mallory = CryptoSession::generate();
        let sealed = a.encrypt_for_peer("hello", &key_of(&b)).unwrap();
        let err = b
            .decrypt_from_peer(&sealed.message, &sealed.one_time_code, &key_of(&mallory))
            .unwrap_err();
        assert!(matches!(err, ConnectError::DecryptionFailed(_)));
    }

    #[test]
    fn short_nonce_is_rejected_without_panicking() {
        let (a, b) = pair();
        let sealed = a.encrypt_for_peer("hello", &key_of(&b)).unwrap();
        let err = b
            .decrypt_from_peer(&sealed.message, &b64_encode(&[0u8; 8]), &key_of(&a))
            .unwrap_err();
        assert!(matches!(err, ConnectError::DecryptionFailed(_)));
    }

    #[test]
    fn session_id_is_24_random_bytes() {
        let s = CryptoSession::generate();
        assert_eq!(b64_decode(&s.session_id()).unwrap().len(), SESSION_ID_LEN);
        assert_eq!(s.session_id(), s.session_id());
        assert_ne!(s.session_id(), CryptoSession::generate().session_id());
    }

    #[test]
    fn peer_key_validates_length() {
        assert!(PeerKey::from_bytes(&[0u8; 31]).is_err());
        let s = CryptoSession::generate();
        let key = PeerKey::from_base64(&s.public_key_base64()).unwrap();
        assert_eq!(key.as_bytes(), &s.public_key());
        assert_eq!(key.to_base64(), s.public_key_base64());
    }
}
