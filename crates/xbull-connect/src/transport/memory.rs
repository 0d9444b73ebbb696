//! In-process page/popup transport.
//!
//! [`MemoryChannel`] plays the page's message event target, [`MemoryOpener`]
//! opens [`MemoryWindow`]s, and every opened window shows up on the far side
//! as a [`Popup`]: whatever the page posts arrives in the popup's inbox, and
//! whatever the popup replies is dispatched on the page's channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use xbull_core::messages::Envelope;
use xbull_core::transport::{ListenerId, MessageCallback, MessageChannel, WalletWindow, WindowOpener};
use xbull_core::{encode_envelope, ConnectError, ConnectResult};

type SharedCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// An in-memory message event target.
#[derive(Default)]
pub struct MemoryChannel {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, SharedCallback>>,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver `message` to every registered listener.
    pub fn dispatch(&self, message: Value) {
        // Callbacks run outside the lock so they may touch the channel.
        let callbacks: Vec<SharedCallback> = self.listeners().values().cloned().collect();
        trace!(listeners = callbacks.len(), "dispatching message");
        for callback in callbacks {
            callback(message.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerId, SharedCallback>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageChannel for MemoryChannel {
    fn add_listener(&self, callback: MessageCallback) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners().insert(id, Arc::from(callback));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners().remove(&id);
    }
}

#[derive(Default)]
struct WindowState {
    closed: AtomicBool,
}

impl WindowState {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Opens [`MemoryWindow`]s and hands the far side of each to a receiver.
pub struct MemoryOpener {
    channel: Arc<MemoryChannel>,
    popups: mpsc::UnboundedSender<Popup>,
    blocked: Mutex<Option<String>>,
    opened: AtomicU64,
}

impl MemoryOpener {
    /// Create an opener whose popups reply on `channel`.
    pub fn new(channel: Arc<MemoryChannel>) -> (Arc<Self>, mpsc::UnboundedReceiver<Popup>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Arc::new(Self {
            channel,
            popups: tx,
            blocked: Mutex::new(None),
            opened: AtomicU64::new(0),
        });
        (opener, rx)
    }

    /// Make the next `open` fail with `reason`, like a popup blocker.
    pub fn block_next_open(&self, reason: impl Into<String>) {
        *self.blocked.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Number of windows opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl WindowOpener for MemoryOpener {
    fn open(&self, url: &str, name: &str, features: &str) -> ConnectResult<Box<dyn WalletWindow>> {
        if let Some(reason) = self.blocked.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(ConnectError::Transport(reason));
        }

        let state = Arc::new(WindowState::default());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let popup = Popup {
            url: url.to_string(),
            name: name.to_string(),
            features: features.to_string(),
            inbox: inbox_rx,
            state: state.clone(),
            channel: self.channel.clone(),
        };
        if self.popups.send(popup).is_err() {
            debug!("nobody is serving popups, window opened without a wallet");
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryWindow {
            state,
            inbox: inbox_tx,
        }))
    }
}

/// The page's handle to an in-memory popup.
pub struct MemoryWindow {
    state: Arc<WindowState>,
    inbox: mpsc::UnboundedSender<Value>,
}

impl WalletWindow for MemoryWindow {
    fn post_message(&self, message: Value) -> ConnectResult<()> {
        if self.state.is_closed() {
            return Err(ConnectError::Transport("wallet window is closed".into()));
        }
        self.inbox
            .send(message)
            .map_err(|_| ConnectError::Transport("wallet window is gone".into()))
    }

    fn close(&self) {
        self.state.close();
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// The wallet's side of an in-memory popup.
pub struct Popup {
    /// URL the popup was opened with.
    pub url: String,
    pub name: String,
    pub features: String,
    inbox: mpsc::UnboundedReceiver<Value>,
    state: Arc<WindowState>,
    channel: Arc<MemoryChannel>,
}

impl Popup {
    /// Next message posted by the page. `None` once the page dropped the
    /// window handle.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbox.recv().await
    }

    /// Post a raw message to the page that opened this popup.
    pub fn reply(&self, message: Value) -> ConnectResult<()> {
        if self.state.is_closed() {
            return Err(ConnectError::Transport("popup is closed".into()));
        }
        self.channel.dispatch(message);
        Ok(())
    }

    /// Post an envelope to the page.
    pub fn post(&self, envelope: &Envelope) -> ConnectResult<()> {
        self.reply(encode_envelope(envelope)?)
    }

    /// Close the popup as the user would.
    pub fn close(&self) {
        self.state.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}
