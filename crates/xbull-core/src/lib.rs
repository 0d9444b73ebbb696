//! xbull-core: shared protocol library for xBull Wallet Connect.
//!
//! Provides the JSON wire envelopes, the base64/JSON codec, the ephemeral
//! box encryption session, the error taxonomy, and the capability traits the
//! connector's transports implement.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode_envelope, encode_envelope};
pub use crypto::{CryptoSession, PeerKey, Sealed};
pub use error::{ConnectError, ConnectResult};
pub use messages::{ConnectParams, Envelope, EventType, OperationKind, RequestBody, SignParams};
pub use transport::{BridgeError, ExtensionBridge, MessageChannel, WalletWindow, WindowOpener};
