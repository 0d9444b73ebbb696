//! JSON envelope codec and base64 helpers.
//!
//! Envelopes travel as JSON objects; binary fields (keys, ciphertext, nonces)
//! are standard base64 with padding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

use crate::error::{ConnectError, ConnectResult};
use crate::messages::{Envelope, EventType};

/// Encode bytes as standard padded base64.
pub fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode standard padded base64.
pub fn b64_decode(data: &str) -> ConnectResult<Vec<u8>> {
    Ok(BASE64.decode(data)?)
}

/// Serialize a value to a JSON string (the plaintext fed to the box).
pub fn json_encode<T: serde::Serialize>(value: &T) -> ConnectResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a JSON string into a typed value.
pub fn json_decode<T: serde::de::DeserializeOwned>(data: &str) -> ConnectResult<T> {
    Ok(serde_json::from_str(data)?)
}

/// Encode an envelope into the JSON object posted over the transport.
pub fn encode_envelope(envelope: &Envelope) -> ConnectResult<Value> {
    Ok(serde_json::to_value(envelope)?)
}

/// Read the `type` tag of a raw message, if it is one of ours.
pub fn peek_type(raw: &Value) -> Option<EventType> {
    raw.get("type")?.as_str().and_then(EventType::from_tag)
}

/// Decode a raw inbound message.
///
/// Returns `Ok(None)` for anything that is not tagged with one of our types:
/// the transport is shared and foreign traffic is normal. A message carrying
/// our tag but the wrong shape is an error.
pub fn decode_envelope(raw: &Value) -> ConnectResult<Option<Envelope>> {
    let Some(event_type) = peek_type(raw) else {
        return Ok(None);
    };

    serde_json::from_value::<Envelope>(raw.clone())
        .map(Some)
        .map_err(|e| ConnectError::InvalidMessage(format!("malformed {event_type} envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::WalletResponse;
    use serde_json::json;

    #[test]
    fn base64_matches_standard_alphabet() {
        assert_eq!(b64_encode(&[0xfb, 0xff]), "+/8=");
        assert_eq!(b64_decode("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert!(b64_decode("not base64!").is_err());
    }

    #[test]
    fn foreign_messages_are_not_errors() {
        assert!(decode_envelope(&json!("hello")).unwrap().is_none());
        assert!(decode_envelope(&json!({"type": "webpackOk"})).unwrap().is_none());
        assert!(decode_envelope(&json!({"source": "react-devtools"})).unwrap().is_none());
        assert!(decode_envelope(&json!({"type": 7})).unwrap().is_none());
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let err = decode_envelope(&json!({"type": "XBULL_CONNECT_RESPONSE"})).unwrap_err();
        assert!(matches!(err, ConnectError::InvalidMessage(_)));
    }

    #[test]
    fn decodes_known_envelope() {
        let raw = json!({"type": "XBULL_CONNECT_RESPONSE", "success": false, "message": "nope"});
        let env = decode_envelope(&raw).unwrap().unwrap();
        assert_eq!(
            env,
            Envelope::ConnectResponse(WalletResponse {
                success: false,
                message: Some("nope".into()),
                one_time_code: None,
                request_id: None,
            })
        );
        assert_eq!(encode_envelope(&env).unwrap(), raw);
    }
}
