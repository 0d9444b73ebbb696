//! Transports the connector is built on.
//!
//! The connector never reaches for a global window or message bus: every
//! transport it uses is handed to it as a [`Capabilities`] bundle.
//! [`memory`] provides an in-process page/popup pair for tests and the
//! simulator binary.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use xbull_core::transport::{ExtensionBridge, MessageChannel, WindowOpener};

pub use memory::{MemoryChannel, MemoryOpener, Popup};

/// Everything the connector needs from its environment.
#[derive(Clone)]
pub struct Capabilities {
    /// Raw inbound message stream shared with unrelated traffic.
    pub channel: Arc<dyn MessageChannel>,
    /// Opens wallet popups.
    pub opener: Arc<dyn WindowOpener>,
    /// Trusted in-process signer, when one is installed.
    pub bridge: Option<Arc<dyn ExtensionBridge>>,
}

impl Capabilities {
    pub fn new(channel: Arc<dyn MessageChannel>, opener: Arc<dyn WindowOpener>) -> Self {
        Self {
            channel,
            opener,
            bridge: None,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn ExtensionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("bridge", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}
