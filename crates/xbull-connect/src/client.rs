//! The xBull Wallet Connect facade.
//!
//! `WalletConnect` owns one [`CryptoSession`] for its whole life and exposes
//! `connect`/`sign`. Each call either goes straight to a trusted in-process
//! bridge or through the encrypted popup. Popup traffic is handled by a
//! single driver task that owns the [`SessionMachine`], the popup handle, the
//! inbound subscription and the liveness watchdog; callers talk to it over a
//! command channel and wait on oneshot replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use xbull_core::crypto::{CryptoSession, KEY_LEN};
use xbull_core::messages::{ConnectParams, RequestBody, SignParams};
use xbull_core::transport::{
    ExtensionBridge, SignTransactionOptions, SignTransactionRequest, WalletWindow, WindowOpener,
};
use xbull_core::{encode_envelope, ConnectError, ConnectResult};

use crate::config::{ConnectConfig, PreferredTarget};
use crate::listener::{ChannelListener, Inbound};
use crate::machine::{popup_url, Effect, Event, Outcome, SessionMachine, WaiterId};
use crate::transport::Capabilities;
use crate::watchdog::Watchdog;

const XDR_NOT_A_STRING: &str = "XDR provided needs to be a string value";
const CONNECTION_CLOSED: &str = "connection closed";

enum Command {
    Open {
        reply: oneshot::Sender<Outcome>,
    },
    Request {
        body: RequestBody,
        reply: oneshot::Sender<Outcome>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Connector between a page and an xBull wallet.
pub struct WalletConnect {
    config: ConnectConfig,
    public_key: [u8; KEY_LEN],
    session_id: String,
    popup_url: String,
    bridge: Option<Arc<dyn ExtensionBridge>>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

impl WalletConnect {
    /// Create a connector and start its driver task.
    ///
    /// Must be called from within a tokio runtime. The raw inbound listener
    /// is attached here and stays attached until
    /// [`close_connections`](Self::close_connections) or drop.
    pub fn new(config: ConnectConfig, capabilities: Capabilities) -> ConnectResult<Self> {
        let wallet_url = config.validate()?;
        let crypto = CryptoSession::generate();
        let public_key = crypto.public_key();
        let session_id = crypto.session_id();
        let popup_url = popup_url(&wallet_url, &crypto.public_key_base64(), &session_id);

        let listener = ChannelListener::attach(capabilities.channel);
        let inbound = listener.subscribe();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: SessionMachine::new(crypto, &wallet_url),
            listener,
            inbound,
            opener: capabilities.opener,
            window: None,
            window_name: config.window_name.clone(),
            features: config.window.to_string(),
            watchdog: Watchdog::start(config.watchdog_interval),
            waiters: HashMap::new(),
            next_waiter: 0,
        };
        tokio::spawn(driver.run(command_rx));

        info!(
            wallet_url = %wallet_url,
            preferred_target = %config.preferred_target,
            bridge = capabilities.bridge.is_some(),
            "wallet connector ready"
        );

        Ok(Self {
            config,
            public_key,
            session_id,
            popup_url,
            bridge: capabilities.bridge,
            commands,
            closed: AtomicBool::new(false),
        })
    }

    /// This connector's box public key.
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public_key
    }

    /// This connector's session id.
    pub fn session_id(&self) -> String {
        self.session_id.clone()
    }

    /// URL the wallet popup is opened with.
    pub fn popup_url(&self) -> &str {
        &self.popup_url
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Open a fresh wallet popup and wait until it proves it belongs to this
    /// session. Any previous popup is closed and whatever waited on it fails.
    pub async fn open_wallet(&self) -> ConnectResult<()> {
        match self.call(|reply| Command::Open { reply }).await? {
            Outcome::Opened => Ok(()),
            Outcome::Failed(e) => Err(e),
            Outcome::Completed(_) => Err(ConnectError::InvalidMessage(
                "open completed with an operation result".into(),
            )),
        }
    }

    /// Ask the wallet for its public key.
    pub async fn connect(&self, params: ConnectParams) -> ConnectResult<String> {
        self.ensure_open()?;

        if let Some(bridge) = self.extension() {
            debug!("connecting through the extension bridge");
            let response = bridge.get_address().await?;
            return Ok(response.address);
        }

        self.open_wallet().await?;
        self.request(RequestBody::Connect(params)).await
    }

    /// Ask the wallet to sign a transaction; returns the signed XDR.
    pub async fn sign(&self, params: SignParams) -> ConnectResult<String> {
        self.ensure_open()?;

        if let Some(bridge) = self.extension() {
            debug!("signing through the extension bridge");
            let request = SignTransactionRequest {
                xdr: params.xdr,
                opts: SignTransactionOptions {
                    network_passphrase: params.network,
                    address: params.public_key,
                },
            };
            let signed = bridge.sign_transaction(request).await?;
            return Ok(signed.signed_tx_xdr);
        }

        self.open_wallet().await?;
        self.request(RequestBody::Sign(params)).await
    }

    /// [`sign`](Self::sign) with untyped parameters, as received from
    /// scripts. A non-string `xdr` fails before any traffic.
    pub async fn sign_json(&self, params: Value) -> ConnectResult<String> {
        if !params.get("xdr").is_some_and(Value::is_string) {
            return Err(ConnectError::PreconditionFailed(XDR_NOT_A_STRING.into()));
        }
        let params: SignParams = serde_json::from_value(params)?;
        self.sign(params).await
    }

    /// Shut the connector down for good: close the popup, detach the inbound
    /// listener and fail everything still waiting. Idempotent.
    pub async fn close_connections(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn extension(&self) -> Option<&Arc<dyn ExtensionBridge>> {
        match (&self.bridge, self.config.preferred_target) {
            (Some(bridge), PreferredTarget::Extension) => Some(bridge),
            _ => None,
        }
    }

    fn ensure_open(&self) -> ConnectResult<()> {
        if self.is_closed() {
            return Err(ConnectError::Cancelled(CONNECTION_CLOSED.into()));
        }
        Ok(())
    }

    async fn request(&self, body: RequestBody) -> ConnectResult<String> {
        match self.call(|reply| Command::Request { body, reply }).await? {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(e) => Err(e),
            Outcome::Opened => Err(ConnectError::InvalidMessage(
                "request completed with a handshake result".into(),
            )),
        }
    }

    async fn call<F>(&self, command: F) -> ConnectResult<Outcome>
    where
        F: FnOnce(oneshot::Sender<Outcome>) -> Command,
    {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ConnectError::Cancelled(CONNECTION_CLOSED.into()))?;
        outcome
            .await
            .map_err(|_| ConnectError::Cancelled(CONNECTION_CLOSED.into()))
    }
}

/// Owns all popup-side state. Runs until shutdown or until the facade is
/// dropped.
struct Driver {
    machine: SessionMachine,
    listener: ChannelListener,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    opener: Arc<dyn WindowOpener>,
    window: Option<Box<dyn WalletWindow>>,
    window_name: String,
    features: String,
    watchdog: Watchdog,
    waiters: HashMap<WaiterId, oneshot::Sender<Outcome>>,
    next_waiter: WaiterId,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Open { reply }) => {
                        let waiter = self.register(reply);
                        self.apply(Event::OpenRequested { waiter });
                    }
                    Some(Command::Request { body, reply }) => {
                        let waiter = self.register(reply);
                        self.apply(Event::RequestSubmitted { waiter, body });
                    }
                    Some(Command::Shutdown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        debug!("connector dropped, shutting down");
                        self.shutdown();
                        break;
                    }
                },

                inbound = self.inbound.recv() => match inbound {
                    Some(inbound) => self.apply(Event::Inbound(inbound)),
                    None => {
                        error!("inbound stream closed unexpectedly");
                        self.shutdown();
                        break;
                    }
                },

                _ = self.watchdog.tick() => {
                    if self.watchdog.target_closed(self.window.as_deref()) {
                        self.window = None;
                        self.apply(Event::TargetClosed);
                    }
                }
            }
        }

        debug!("driver loop ended");
    }

    fn register(&mut self, reply: oneshot::Sender<Outcome>) -> WaiterId {
        self.next_waiter += 1;
        self.waiters.insert(self.next_waiter, reply);
        self.next_waiter
    }

    fn shutdown(&mut self) {
        self.apply(Event::Shutdown);
        self.listener.detach();
        // Anything left never reached the machine.
        for (_, reply) in self.waiters.drain() {
            let _ = reply.send(Outcome::Failed(ConnectError::Cancelled(CONNECTION_CLOSED.into())));
        }
    }

    fn apply(&mut self, event: Event) {
        for effect in self.machine.handle(event) {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenWindow { url } => {
                if let Some(previous) = self.window.take() {
                    previous.close();
                }
                match self.opener.open(&url, &self.window_name, &self.features) {
                    Ok(window) => {
                        info!(url = %url, "opened wallet window");
                        self.window = Some(window);
                    }
                    Err(e) => {
                        error!("failed to open wallet window: {e}");
                        self.apply(Event::OpenFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Effect::CloseWindow => {
                if let Some(window) = self.window.take() {
                    debug!("closing wallet window");
                    window.close();
                }
            }
            Effect::Post(envelope) => {
                let event = envelope.event_type();
                let posted = encode_envelope(&envelope).and_then(|message| match &self.window {
                    Some(window) => window.post_message(message),
                    None => Err(ConnectError::Transport("no wallet window".into())),
                });
                if let Err(e) = posted {
                    error!(%event, "failed to post to wallet window: {e}");
                    if let Some(window) = self.window.take() {
                        window.close();
                    }
                    self.apply(Event::TargetClosed);
                }
            }
            Effect::Resolve { waiter, outcome } => {
                if let Some(reply) = self.waiters.remove(&waiter) {
                    // The caller may have given up; nothing to do then.
                    let _ = reply.send(outcome);
                }
            }
        }
    }
}
