//! Per-connector session state machine.
//!
//! All protocol decisions live here as `handle(event) -> effects`. The
//! machine never touches a window or a channel itself; the driver in
//! `client.rs` feeds it events and performs the effects it returns.
//!
//! ```text
//!   Idle ──open──▶ AwaitingHandshake ──valid hello──▶ PeerIdentified
//!    ▲                   │                                  │
//!    └── window closed / reopened / last operation resolved ┘
//!   any ──shutdown──▶ Closed
//! ```

use std::collections::VecDeque;

use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use xbull_core::codec::{json_decode, json_encode};
use xbull_core::crypto::{CryptoSession, PeerKey};
use xbull_core::messages::{
    ConnectOutcome, Correlated, EncryptedRequest, Envelope, InitialResponse, OperationKind,
    RequestBody, SignOutcome, WalletResponse,
};
use xbull_core::{ConnectError, ConnectResult};

use crate::handshake::verify_initial_response;
use crate::listener::Inbound;

pub const WALLET_NOT_OPEN: &str = "xBull Wallet is not open, we can't connect with it";
pub const KEY_NOT_ESTABLISHED: &str = "Wallet encryption key is not established, request rejected.";
pub const REQUEST_REJECTED: &str = "Request rejected from the wallet";

const WINDOW_CLOSED: &str = "the wallet window was closed before the request completed";
const WINDOW_REPLACED: &str = "the wallet window was replaced by a new one";
const CONNECTION_CLOSED: &str = "connection closed";

/// Identifies a caller waiting on the machine.
pub type WaiterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No popup.
    Idle,
    /// Popup opened, waiting for its handshake response.
    AwaitingHandshake,
    /// Peer key pinned for the current popup.
    PeerIdentified,
    /// Permanently shut down.
    Closed,
}

#[derive(Debug)]
pub enum Event {
    /// A caller wants a fresh popup and waits for its handshake.
    OpenRequested { waiter: WaiterId },
    /// The popup could not be opened.
    OpenFailed { reason: String },
    /// A classified inbound message.
    Inbound(Inbound),
    /// A caller submits an operation to the identified peer.
    RequestSubmitted { waiter: WaiterId, body: RequestBody },
    /// The liveness check found the popup closed.
    TargetClosed,
    /// Permanent shutdown.
    Shutdown,
}

#[derive(Debug)]
pub enum Effect {
    /// Close any current popup handle and open `url`.
    OpenWindow { url: String },
    /// Close the current popup.
    CloseWindow,
    /// Post an envelope to the current popup.
    Post(Envelope),
    /// Complete a waiter.
    Resolve { waiter: WaiterId, outcome: Outcome },
}

#[derive(Debug)]
pub enum Outcome {
    /// Handshake completed.
    Opened,
    /// Operation completed with the wallet's result (public key or signed XDR).
    Completed(String),
    Failed(ConnectError),
}

#[derive(Debug)]
struct PendingOperation {
    waiter: WaiterId,
    kind: OperationKind,
    request_id: String,
}

/// Protocol state for one connector.
pub struct SessionMachine {
    crypto: CryptoSession,
    popup_url: String,
    phase: Phase,
    peer: Option<PeerKey>,
    target_open: bool,
    handshake_waiters: Vec<WaiterId>,
    pending: VecDeque<PendingOperation>,
}

impl SessionMachine {
    pub fn new(crypto: CryptoSession, wallet_url: &Url) -> Self {
        let popup_url = popup_url(wallet_url, &crypto.public_key_base64(), &crypto.session_id());
        Self {
            crypto,
            popup_url,
            phase: Phase::Idle,
            peer: None,
            target_open: false,
            handshake_waiters: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The peer key pinned for the current popup, if any.
    pub fn peer(&self) -> Option<PeerKey> {
        self.peer
    }

    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    pub fn popup_url(&self) -> &str {
        &self.popup_url
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::OpenRequested { waiter } => self.on_open(waiter, &mut effects),
            Event::OpenFailed { reason } => self.on_open_failed(&reason, &mut effects),
            Event::Inbound(Inbound::Handshake(hello)) => self.on_handshake(&hello, &mut effects),
            Event::Inbound(Inbound::Response { kind, response }) => {
                self.on_response(kind, response, &mut effects)
            }
            Event::RequestSubmitted { waiter, body } => self.on_request(waiter, body, &mut effects),
            Event::TargetClosed => {
                if self.target_open {
                    info!("wallet window closed, cancelling current operations");
                    self.end_cycle(WINDOW_CLOSED, &mut effects);
                }
            }
            Event::Shutdown => self.on_shutdown(&mut effects),
        }
        effects
    }

    fn on_open(&mut self, waiter: WaiterId, effects: &mut Vec<Effect>) {
        if self.phase == Phase::Closed {
            fail(waiter, ConnectError::Cancelled(CONNECTION_CLOSED.into()), effects);
            return;
        }

        if self.target_open {
            effects.push(Effect::CloseWindow);
            self.end_cycle(WINDOW_REPLACED, effects);
        }

        self.target_open = true;
        self.phase = Phase::AwaitingHandshake;
        self.handshake_waiters.push(waiter);
        effects.push(Effect::OpenWindow {
            url: self.popup_url.clone(),
        });
    }

    fn on_open_failed(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        if !self.target_open {
            return;
        }
        warn!(reason, "wallet window could not be opened");
        self.target_open = false;
        self.peer = None;
        self.phase = Phase::Idle;
        for waiter in self.handshake_waiters.drain(..) {
            fail(
                waiter,
                ConnectError::PreconditionFailed(format!("{WALLET_NOT_OPEN} ({reason})")),
                effects,
            );
        }
    }

    fn on_handshake(&mut self, hello: &InitialResponse, effects: &mut Vec<Effect>) {
        if self.phase != Phase::AwaitingHandshake {
            debug!(phase = ?self.phase, "ignoring handshake response outside of a handshake");
            return;
        }

        match verify_initial_response(&self.crypto, hello) {
            Ok(peer) => {
                info!(peer = ?peer, "wallet identified");
                self.peer = Some(peer);
                self.phase = Phase::PeerIdentified;
                for waiter in self.handshake_waiters.drain(..) {
                    effects.push(Effect::Resolve {
                        waiter,
                        outcome: Outcome::Opened,
                    });
                }
            }
            Err(reason) => debug!(%reason, "dropping handshake response"),
        }
    }

    fn on_request(&mut self, waiter: WaiterId, body: RequestBody, effects: &mut Vec<Effect>) {
        if self.phase == Phase::Closed {
            fail(waiter, ConnectError::Cancelled(CONNECTION_CLOSED.into()), effects);
            return;
        }
        if !self.target_open {
            fail(waiter, ConnectError::PreconditionFailed(WALLET_NOT_OPEN.into()), effects);
            return;
        }
        let Some(peer) = self.peer else {
            fail(waiter, ConnectError::PreconditionFailed(KEY_NOT_ESTABLISHED.into()), effects);
            return;
        };

        let kind = body.kind();
        let request_id = new_request_id();
        match self.seal_request(body, &request_id, &peer) {
            Ok(envelope) => {
                debug!(%kind, request_id = %request_id, "sending request to wallet");
                effects.push(Effect::Post(envelope));
                self.pending.push_back(PendingOperation {
                    waiter,
                    kind,
                    request_id,
                });
            }
            Err(e) => fail(waiter, e, effects),
        }
    }

    fn seal_request(
        &self,
        body: RequestBody,
        request_id: &str,
        peer: &PeerKey,
    ) -> ConnectResult<Envelope> {
        let kind = body.kind();
        let id = Some(request_id.to_string());
        let plaintext = match body {
            RequestBody::Connect(params) => json_encode(&Correlated::new(params, id))?,
            RequestBody::Sign(params) => json_encode(&Correlated::new(params, id))?,
        };
        let sealed = self.crypto.encrypt_for_peer(&plaintext, peer)?;
        Ok(Envelope::request(
            kind,
            EncryptedRequest {
                message: sealed.message,
                one_time_code: sealed.one_time_code,
            },
        ))
    }

    fn on_response(&mut self, kind: OperationKind, response: WalletResponse, effects: &mut Vec<Effect>) {
        if !self.pending.iter().any(|op| op.kind == kind) {
            debug!(%kind, "no operation awaiting this response, dropping");
            return;
        }

        // Operations are only queued while a peer is pinned, and leave the
        // queue whenever it is cleared.
        let Some(peer) = self.peer else {
            debug_assert!(false, "pending {kind} operation without a pinned peer");
            return;
        };

        if !response.success {
            let message = response
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| REQUEST_REJECTED.to_string());
            info!(%kind, "wallet rejected the request");
            self.settle(
                kind,
                response.request_id.as_deref(),
                Outcome::Failed(ConnectError::PeerRejected(message)),
                effects,
            );
            return;
        }

        // Until the payload authenticates under the pinned key this could be
        // anyone on the shared channel, so it must not touch pending work.
        let (Some(message), Some(one_time_code)) = (response.message, response.one_time_code) else {
            warn!(%kind, "accepted response without a payload, dropping");
            return;
        };

        let plaintext = match self.crypto.decrypt_from_peer(&message, &one_time_code, &peer) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(%kind, "response does not authenticate as the identified wallet, dropping: {e}");
                return;
            }
        };

        match parse_outcome(kind, &plaintext) {
            Ok((value, request_id)) => {
                self.settle(kind, request_id.as_deref(), Outcome::Completed(value), effects)
            }
            Err(e) => self.settle(kind, None, Outcome::Failed(e), effects),
        }
    }

    /// Resolve one pending operation of `kind`: the one with `request_id`
    /// when given, otherwise the oldest. Closes the popup once nothing else
    /// waits on it.
    fn settle(
        &mut self,
        kind: OperationKind,
        request_id: Option<&str>,
        outcome: Outcome,
        effects: &mut Vec<Effect>,
    ) {
        let position = match request_id {
            Some(id) => self
                .pending
                .iter()
                .position(|op| op.kind == kind && op.request_id == id),
            None => self.pending.iter().position(|op| op.kind == kind),
        };
        let Some(op) = position.and_then(|i| self.pending.remove(i)) else {
            debug!(%kind, request_id = ?request_id, "response matches no pending request, dropping");
            return;
        };

        debug!(%kind, request_id = %op.request_id, "request settled");
        effects.push(Effect::Resolve {
            waiter: op.waiter,
            outcome,
        });

        if self.pending.is_empty() && self.target_open {
            effects.push(Effect::CloseWindow);
            self.target_open = false;
            self.peer = None;
            self.phase = Phase::Idle;
        }
    }

    fn on_shutdown(&mut self, effects: &mut Vec<Effect>) {
        if self.phase == Phase::Closed {
            return;
        }
        if self.target_open {
            effects.push(Effect::CloseWindow);
        }
        self.end_cycle(CONNECTION_CLOSED, effects);
        self.phase = Phase::Closed;
        info!("wallet connection shut down");
    }

    /// Invalidate the current popup: forget its peer key and cancel every
    /// waiter tied to it.
    fn end_cycle(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        self.target_open = false;
        self.peer = None;
        if self.phase != Phase::Closed {
            self.phase = Phase::Idle;
        }

        for waiter in self.handshake_waiters.drain(..) {
            fail(waiter, ConnectError::Cancelled(reason.into()), effects);
        }
        for op in self.pending.drain(..) {
            fail(op.waiter, ConnectError::Cancelled(reason.into()), effects);
        }
    }
}

fn fail(waiter: WaiterId, err: ConnectError, effects: &mut Vec<Effect>) {
    effects.push(Effect::Resolve {
        waiter,
        outcome: Outcome::Failed(err),
    });
}

/// Decode an accepted response into its result value and correlation id.
fn parse_outcome(kind: OperationKind, plaintext: &str) -> ConnectResult<(String, Option<String>)> {
    match kind {
        OperationKind::Connect => {
            let outcome: Correlated<ConnectOutcome> = json_decode(plaintext)?;
            Ok((outcome.body.public_key, outcome.request_id))
        }
        OperationKind::Sign => {
            let outcome: Correlated<SignOutcome> = json_decode(plaintext)?;
            Ok((outcome.body.xdr, outcome.request_id))
        }
    }
}

/// `{wallet_url}?public=<b64 key>&session=<session id>`, both URL-encoded.
pub fn popup_url(wallet_url: &Url, public_key_b64: &str, session_id: &str) -> String {
    let mut url = wallet_url.clone();
    url.query_pairs_mut()
        .append_pair("public", public_key_b64)
        .append_pair("session", session_id);
    url.to_string()
}

fn new_request_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{WalletPeer, WalletRequest};
    use xbull_core::messages::{ConnectParams, SignParams};

    fn machine() -> SessionMachine {
        let url = Url::parse("https://wallet.xbull.app/connect").unwrap();
        SessionMachine::new(CryptoSession::generate(), &url)
    }

    fn inbound(envelope: Envelope) -> Event {
        let raw = xbull_core::encode_envelope(&envelope).unwrap();
        Event::Inbound(crate::listener::classify(&raw).unwrap())
    }

    fn resolved(effects: &[Effect]) -> Vec<(WaiterId, &Outcome)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Resolve { waiter, outcome } => Some((*waiter, outcome)),
                _ => None,
            })
            .collect()
    }

    fn posted(effects: &[Effect]) -> &Envelope {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Post(env) => Some(env),
                _ => None,
            })
            .expect("no post effect")
    }

    /// Open a popup and complete the handshake; returns the simulated wallet.
    fn identified(m: &mut SessionMachine) -> WalletPeer {
        let effects = m.handle(Event::OpenRequested { waiter: 1 });
        assert!(matches!(effects.as_slice(), [Effect::OpenWindow { .. }]));
        let wallet = WalletPeer::from_popup_url(m.popup_url()).unwrap();
        let effects = m.handle(inbound(wallet.initial_response().unwrap()));
        assert!(matches!(resolved(&effects)[..], [(1, Outcome::Opened)]));
        wallet
    }

    fn submit(m: &mut SessionMachine, wallet: &WalletPeer, waiter: WaiterId, body: RequestBody) -> WalletRequest {
        let effects = m.handle(Event::RequestSubmitted { waiter, body });
        wallet.open_request(posted(&effects)).unwrap()
    }

    #[test]
    fn popup_url_encodes_key_and_session() {
        let url = Url::parse("https://wallet.xbull.app/connect").unwrap();
        let built = popup_url(&url, "ab+/cd==", "x/y+z=");
        assert_eq!(
            built,
            "https://wallet.xbull.app/connect?public=ab%2B%2Fcd%3D%3D&session=x%2Fy%2Bz%3D"
        );
    }

    #[test]
    fn mismatched_session_does_not_identify() {
        let mut m = machine();
        m.handle(Event::OpenRequested { waiter: 1 });
        let wallet = WalletPeer::from_popup_url(m.popup_url()).unwrap();

        let stale = CryptoSession::generate().session_id();
        let effects = m.handle(inbound(wallet.initial_response_for(&stale).unwrap()));
        assert!(effects.is_empty());
        assert_eq!(m.phase(), Phase::AwaitingHandshake);
        assert!(m.peer().is_none());
    }

    #[test]
    fn handshake_pins_wallet_key_once_per_popup() {
        let mut m = machine();
        let wallet = identified(&mut m);
        assert_eq!(m.phase(), Phase::PeerIdentified);
        let pinned = m.peer().unwrap();
        assert_eq!(pinned.to_base64(), wallet.public_key_base64());

        // Another wallet answering for the same session cannot replace it.
        let intruder = WalletPeer::from_popup_url(m.popup_url()).unwrap();
        let effects = m.handle(inbound(intruder.initial_response().unwrap()));
        assert!(effects.is_empty());
        assert_eq!(m.peer(), Some(pinned));
    }

    #[test]
    fn request_without_popup_fails_fast() {
        let mut m = machine();
        let effects = m.handle(Event::RequestSubmitted {
            waiter: 7,
            body: RequestBody::Connect(ConnectParams::default()),
        });
        match resolved(&effects)[..] {
            [(7, Outcome::Failed(ConnectError::PreconditionFailed(msg)))] => {
                assert_eq!(msg, WALLET_NOT_OPEN)
            }
            ref other => panic!("unexpected: {other:?}"),
        }
        assert!(!effects.iter().any(|e| matches!(e, Effect::Post(_))));
    }

    #[test]
    fn request_before_handshake_is_not_sent() {
        let mut m = machine();
        m.handle(Event::OpenRequested { waiter: 1 });
        let effects = m.handle(Event::RequestSubmitted {
            waiter: 2,
            body: RequestBody::Connect(ConnectParams::default()),
        });
        assert!(!effects.iter().any(|e| matches!(e, Effect::Post(_))));
        assert!(matches!(
            resolved(&effects)[..],
            [(2, Outcome::Failed(ConnectError::PreconditionFailed(_)))]
        ));
    }

    #[test]
    fn connect_resolves_exactly_once() {
        let mut m = machine();
        let wallet = identified(&mut m);
        let request = submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));
        assert!(matches!(request.body, RequestBody::Connect(p) if p == ConnectParams::default()));
        assert!(request.request_id.is_some());

        let reply = wallet.approve(&request, "PKEY1").unwrap();
        let effects = m.handle(inbound(reply.clone()));
        match resolved(&effects)[..] {
            [(2, Outcome::Completed(value))] => assert_eq!(value, "PKEY1"),
            ref other => panic!("unexpected: {other:?}"),
        }
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseWindow)));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.peer().is_none());

        // Duplicates and late answers are no-ops.
        assert!(m.handle(inbound(reply)).is_empty());
        assert!(m
            .handle(inbound(wallet.reject(OperationKind::Connect, None)))
            .is_empty());
    }

    #[test]
    fn uncorrelated_reply_settles_oldest() {
        let mut m = machine();
        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 2, RequestBody::Sign(SignParams::new("AAAA")));
        submit(&mut m, &wallet, 3, RequestBody::Sign(SignParams::new("BBBB")));

        let effects = m.handle(inbound(wallet.approve_uncorrelated(OperationKind::Sign, "SIGNED").unwrap()));
        assert!(matches!(resolved(&effects)[..], [(2, Outcome::Completed(_))]));
        assert_eq!(m.pending_operations(), 1);
        // The popup stays open while another request waits on it.
        assert!(!effects.iter().any(|e| matches!(e, Effect::CloseWindow)));
    }

    #[test]
    fn correlated_reply_settles_matching_request() {
        let mut m = machine();
        let wallet = identified(&mut m);
        let first = submit(&mut m, &wallet, 2, RequestBody::Sign(SignParams::new("AAAA")));
        let second = submit(&mut m, &wallet, 3, RequestBody::Sign(SignParams::new("BBBB")));
        assert_ne!(first.request_id, second.request_id);

        let effects = m.handle(inbound(wallet.approve(&second, "BBBB-signed").unwrap()));
        match resolved(&effects)[..] {
            [(3, Outcome::Completed(value))] => assert_eq!(value, "BBBB-signed"),
            ref other => panic!("unexpected: {other:?}"),
        }

        let effects = m.handle(inbound(wallet.approve(&first, "AAAA-signed").unwrap()));
        match resolved(&effects)[..] {
            [(2, Outcome::Completed(value))] => assert_eq!(value, "AAAA-signed"),
            ref other => panic!("unexpected: {other:?}"),
        }
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseWindow)));
    }

    #[test]
    fn rejection_uses_fallback_or_wallet_message() {
        let mut m = machine();
        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));
        let effects = m.handle(inbound(wallet.reject(OperationKind::Connect, None)));
        match resolved(&effects)[..] {
            [(2, Outcome::Failed(err @ ConnectError::PeerRejected(_)))] => {
                assert_eq!(err.to_string(), REQUEST_REJECTED)
            }
            ref other => panic!("unexpected: {other:?}"),
        }

        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 3, RequestBody::Sign(SignParams::new("AAAA")));
        let effects = m.handle(inbound(wallet.reject(OperationKind::Sign, Some("Insufficient funds"))));
        assert!(matches!(
            resolved(&effects)[..],
            [(3, Outcome::Failed(ConnectError::PeerRejected(msg)))] if msg == "Insufficient funds"
        ));
    }

    #[test]
    fn response_of_other_kind_is_ignored() {
        let mut m = machine();
        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));
        let effects = m.handle(inbound(wallet.reject(OperationKind::Sign, None)));
        assert!(effects.is_empty());
        assert_eq!(m.pending_operations(), 1);
    }

    #[test]
    fn forged_response_leaves_the_request_pending() {
        let mut m = machine();
        let wallet = identified(&mut m);
        let request = submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));

        let mut tampered = wallet.approve(&request, "PKEY1").unwrap();
        if let Envelope::ConnectResponse(r) = &mut tampered {
            let mut raw = xbull_core::codec::b64_decode(r.message.as_deref().unwrap()).unwrap();
            raw[0] ^= 0xff;
            r.message = Some(xbull_core::codec::b64_encode(&raw));
        }
        let filler = xbull_core::codec::b64_encode(&[0u8; 48]);
        let forged = Envelope::response(
            OperationKind::Connect,
            WalletResponse {
                success: true,
                message: Some(filler),
                one_time_code: Some(xbull_core::codec::b64_encode(&[0u8; 24])),
                request_id: None,
            },
        );
        let empty = Envelope::response(
            OperationKind::Connect,
            WalletResponse {
                success: true,
                message: None,
                one_time_code: None,
                request_id: None,
            },
        );

        for envelope in [tampered, forged, empty] {
            assert!(m.handle(inbound(envelope)).is_empty());
        }
        assert_eq!(m.pending_operations(), 1);
        assert_eq!(m.phase(), Phase::PeerIdentified);

        let effects = m.handle(inbound(wallet.approve(&request, "PKEY1").unwrap()));
        match resolved(&effects)[..] {
            [(2, Outcome::Completed(key))] => assert_eq!(key, "PKEY1"),
            ref other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn authenticated_but_malformed_response_fails_the_request() {
        let mut m = machine();
        m.handle(Event::OpenRequested { waiter: 1 });
        let url = Url::parse(m.popup_url()).unwrap();
        let query: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();
        let page_key = PeerKey::from_base64(&query["public"]).unwrap();

        let wallet = CryptoSession::generate();
        let hello = crate::handshake::build_initial_response(&wallet, &page_key, &query["session"]).unwrap();
        m.handle(inbound(Envelope::InitialResponse(hello)));
        assert_eq!(m.phase(), Phase::PeerIdentified);

        m.handle(Event::RequestSubmitted {
            waiter: 2,
            body: RequestBody::Connect(ConnectParams::default()),
        });
        let sealed = wallet.encrypt_for_peer(r#"{"unexpected":true}"#, &page_key).unwrap();
        let reply = Envelope::response(
            OperationKind::Connect,
            WalletResponse {
                success: true,
                message: Some(sealed.message),
                one_time_code: Some(sealed.one_time_code),
                request_id: None,
            },
        );
        let effects = m.handle(inbound(reply));
        assert!(matches!(
            resolved(&effects)[..],
            [(2, Outcome::Failed(ConnectError::Codec(_)))]
        ));
    }

    #[test]
    fn closed_window_cancels_handshake_and_requests() {
        let mut m = machine();
        m.handle(Event::OpenRequested { waiter: 1 });
        let effects = m.handle(Event::TargetClosed);
        assert!(matches!(
            resolved(&effects)[..],
            [(1, Outcome::Failed(ConnectError::Cancelled(_)))]
        ));

        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));
        let effects = m.handle(Event::TargetClosed);
        assert!(matches!(
            resolved(&effects)[..],
            [(2, Outcome::Failed(ConnectError::Cancelled(_)))]
        ));
        assert_eq!(m.phase(), Phase::Idle);

        // Fires once per popup.
        assert!(m.handle(Event::TargetClosed).is_empty());
    }

    #[test]
    fn reopening_drops_previous_peer() {
        let mut m = machine();
        let old_wallet = identified(&mut m);
        submit(&mut m, &old_wallet, 2, RequestBody::Connect(ConnectParams::default()));

        let effects = m.handle(Event::OpenRequested { waiter: 3 });
        assert!(matches!(effects.first(), Some(Effect::CloseWindow)));
        assert!(matches!(effects.last(), Some(Effect::OpenWindow { .. })));
        assert!(matches!(
            resolved(&effects)[..],
            [(2, Outcome::Failed(ConnectError::Cancelled(_)))]
        ));
        assert!(m.peer().is_none());
        assert_eq!(m.phase(), Phase::AwaitingHandshake);
    }

    #[test]
    fn open_failure_fails_waiter() {
        let mut m = machine();
        m.handle(Event::OpenRequested { waiter: 1 });
        let effects = m.handle(Event::OpenFailed {
            reason: "popup blocked".into(),
        });
        assert!(matches!(
            resolved(&effects)[..],
            [(1, Outcome::Failed(ConnectError::PreconditionFailed(_)))]
        ));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn shutdown_is_terminal_and_idempotent() {
        let mut m = machine();
        let wallet = identified(&mut m);
        submit(&mut m, &wallet, 2, RequestBody::Connect(ConnectParams::default()));

        let effects = m.handle(Event::Shutdown);
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseWindow)));
        assert!(matches!(
            resolved(&effects)[..],
            [(2, Outcome::Failed(ConnectError::Cancelled(_)))]
        ));
        assert_eq!(m.phase(), Phase::Closed);

        assert!(m.handle(Event::Shutdown).is_empty());
        let effects = m.handle(Event::OpenRequested { waiter: 4 });
        assert!(matches!(
            resolved(&effects)[..],
            [(4, Outcome::Failed(ConnectError::Cancelled(_)))]
        ));
        assert!(!effects.iter().any(|e| matches!(e, Effect::OpenWindow { .. })));
    }
}
