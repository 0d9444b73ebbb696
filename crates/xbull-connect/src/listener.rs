//! The single subscription to the raw inbound transport.
//!
//! `ChannelListener` registers one callback on the shared [`MessageChannel`],
//! classifies every inbound message by its `type` tag and republishes ours to
//! each subscriber's ordered queue. Foreign traffic is dropped quietly.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use xbull_core::codec::decode_envelope;
use xbull_core::messages::{Envelope, InitialResponse, OperationKind, WalletResponse};
use xbull_core::transport::{ListenerId, MessageChannel};

/// Category of a classified inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Handshake,
    ConnectResponse,
    SignResponse,
}

/// A classified inbound envelope addressed to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Handshake(InitialResponse),
    Response {
        kind: OperationKind,
        response: WalletResponse,
    },
}

impl Inbound {
    pub fn category(&self) -> Category {
        match self {
            Self::Handshake(_) => Category::Handshake,
            Self::Response {
                kind: OperationKind::Connect,
                ..
            } => Category::ConnectResponse,
            Self::Response {
                kind: OperationKind::Sign,
                ..
            } => Category::SignResponse,
        }
    }
}

/// Classify a raw inbound message.
///
/// Returns `None` for anything the page does not consume: foreign traffic,
/// our own request types echoed back, and malformed envelopes.
pub fn classify(raw: &Value) -> Option<Inbound> {
    let envelope = match decode_envelope(raw) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            trace!("ignoring foreign message");
            return None;
        }
        Err(e) => {
            debug!("dropping inbound message: {e}");
            return None;
        }
    };

    match envelope {
        Envelope::InitialResponse(hello) => Some(Inbound::Handshake(hello)),
        Envelope::ConnectResponse(response) => Some(Inbound::Response {
            kind: OperationKind::Connect,
            response,
        }),
        Envelope::SignResponse(response) => Some(Inbound::Response {
            kind: OperationKind::Sign,
            response,
        }),
        Envelope::Connect(_) | Envelope::Sign(_) => {
            trace!(event = %envelope.event_type(), "ignoring page-bound request type");
            None
        }
    }
}

struct Shared {
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<Inbound>>>>,
    listener_id: Mutex<Option<ListenerId>>,
}

impl Shared {
    fn publish(&self, inbound: Inbound) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = subscribers.as_mut() else {
            return;
        };
        subscribers.retain(|tx| tx.send(inbound.clone()).is_ok());
    }
}

/// Long-lived subscription to the raw transport.
pub struct ChannelListener {
    channel: Arc<dyn MessageChannel>,
    shared: Arc<Shared>,
}

impl ChannelListener {
    /// Register the listener on `channel`.
    pub fn attach(channel: Arc<dyn MessageChannel>) -> Self {
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Some(Vec::new())),
            listener_id: Mutex::new(None),
        });

        let callback_shared = shared.clone();
        let id = channel.add_listener(Box::new(move |raw: Value| {
            if let Some(inbound) = classify(&raw) {
                callback_shared.publish(inbound);
            }
        }));

        *shared.listener_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        debug!(listener_id = id, "attached inbound listener");

        Self { channel, shared }
    }

    /// Subscribe to every classified message, in arrival order.
    ///
    /// Each subscriber gets its own unbounded queue, so a burst of stray
    /// traffic never displaces a message that arrived before it. Consumers
    /// route by [`Inbound::category`]. After [`detach`](Self::detach) the
    /// returned receiver is already closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subscribers) = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            subscribers.push(tx);
        }
        rx
    }

    /// Remove the transport listener and complete every subscription.
    ///
    /// Returns `true` the first time only.
    pub fn detach(&self) -> bool {
        let id = self
            .shared
            .listener_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(id) = id else {
            return false;
        };

        self.channel.remove_listener(id);
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(listener_id = id, "detached inbound listener");
        true
    }

    pub fn is_attached(&self) -> bool {
        self.shared
            .listener_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        self.detach();
    }
}
