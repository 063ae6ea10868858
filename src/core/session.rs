//! Session façade: the one object the presentation layer talks to.
//!
//! A `Session` owns the handshake, the connection registry, the selected
//! file and the user-facing status. It is driven by a single task: operator
//! intents are method calls, and everything asynchronous (gathering, dials,
//! channel notifications, send progress) comes back through
//! [`Session::next_event`] and is applied with [`Session::handle`], one
//! event at a time.
//!
//! Failures are folded into one current error string that replaces any
//! previous one until [`Session::dismiss_error`].

use crate::core::config::{COPY_FAILED_STATUS, COPY_OK_STATUS};
use crate::core::connection::negotiator::Connector;
use crate::core::connection::transport::{TransportEvent, send_text};
use crate::core::error::{
    ConnectionError, HandshakeError, SessionError, TransferError, ValidationError,
};
use crate::core::events::{EventReceiver, EventSender, SessionEvent};
use crate::core::handshake::{
    Established, GatherSettings, Handshake, HandshakeMode, PendingRemote, SessionState,
};
use crate::core::identity::{EndpointId, validate_identifier};
use crate::core::link::{self, LinkTarget};
use crate::core::registry::{EntryStatus, Registry};
use crate::core::signaling::Discovery;
use crate::core::storage::SessionStore;
use crate::core::transfer::frame;
use crate::core::transfer::{
    ChatLine, FileSource, InboundOutcome, ReceivedFile, ReceivedSummary, SendOutcome, WireShape,
    apply_inbound, send_chunked, send_whole,
};
use crate::utils::clipboard::Clipboard;
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: HandshakeMode,
    /// Base of every shareable link.
    pub origin: Url,
    pub wire: WireShape,
    pub gather: GatherSettings,
}

impl SessionConfig {
    pub fn new(mode: HandshakeMode, origin: Url) -> Self {
        Self {
            mode,
            origin,
            wire: WireShape::default(),
            gather: GatherSettings::default(),
        }
    }
}

/// Something the presentation layer may want to show right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    State(&'static str),
    Connected(EndpointId),
    Closed(EndpointId),
    Message { remote: EndpointId, text: String },
    FileIncoming { remote: EndpointId, name: String, size: u64 },
    FileReceived { remote: EndpointId, file: ReceivedFile },
    FileSent { remote: EndpointId },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub remote: EndpointId,
    pub status: EntryStatus,
    pub sending: bool,
    pub send_progress: u8,
    pub receiving: bool,
    pub receive_progress: u8,
    pub messages: Vec<ChatLine>,
    pub received: Vec<ReceivedSummary>,
}

/// Read model for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: &'static str,
    pub local: EndpointId,
    /// Link the initiator shares: peer link or offer link.
    pub link: Option<String>,
    /// Code the manual responder hands back.
    pub response_code: Option<String>,
    pub error: Option<String>,
    pub copy_status: Option<&'static str>,
    pub target_input: String,
    pub target_error: Option<String>,
    pub selected_file: Option<String>,
    pub entries: Vec<EntrySnapshot>,
}

pub struct Session {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    discovery: Option<Arc<dyn Discovery>>,
    handshake: Handshake,
    registry: Registry,
    clipboard: Box<dyn Clipboard>,
    selected: Option<FileSource>,
    error: Option<String>,
    copy_status: Option<&'static str>,
    target_input: String,
    target_error: Option<ValidationError>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    incoming_attached: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn Connector>,
        discovery: Option<Arc<dyn Discovery>>,
        clipboard: Box<dyn Clipboard>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let local = EndpointId::load_or_create(store.as_ref());
        let handshake = Handshake::new(
            config.mode,
            local,
            config.gather,
            connector,
            discovery.clone(),
            events_tx.clone(),
        );
        let registry = Registry::new(store.clone(), events_tx.clone());
        Self {
            config,
            store,
            discovery,
            handshake,
            registry,
            clipboard,
            selected: None,
            error: None,
            copy_status: None,
            target_input: String::new(),
            target_error: None,
            events_tx,
            events_rx,
            incoming_attached: false,
        }
    }

    pub fn local(&self) -> &EndpointId {
        self.handshake.local()
    }

    pub fn state(&self) -> &SessionState {
        self.handshake.state()
    }

    fn report(&mut self, err: impl Into<SessionError>) -> SessionError {
        let err = err.into();
        warn!(event = "session_error", error = %err, "Operation failed");
        self.error = Some(err.to_string());
        err
    }

    fn check<T>(&mut self, result: Result<T, impl Into<SessionError>>) -> Result<T, SessionError> {
        result.map_err(|e| self.report(e))
    }

    /// Forward channels opened by remote endpoints into the event loop.
    fn attach_incoming(&mut self) {
        if self.incoming_attached {
            return;
        }
        let Some(discovery) = &self.discovery else {
            return;
        };
        if let Some(mut incoming) = discovery.incoming() {
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                while let Some((remote, handle)) = incoming.recv().await {
                    if tx.send(SessionEvent::Incoming { remote, handle }).is_err() {
                        break;
                    }
                }
            });
        }
        self.incoming_attached = true;
    }

    // ── Handshake intents ────────────────────────────────────────────────────

    pub async fn start_session(&mut self) -> Result<(), SessionError> {
        self.attach_incoming();
        self.copy_status = None;
        let active = self.registry.any_transfer_active();
        let result = self.handshake.start(active).await;
        self.check(result)
    }

    /// Read a shareable link and wait for the operator to accept it.
    pub fn open_link(&mut self, url: &str) -> Result<(), SessionError> {
        let target = link::parse(url);
        let target = self.check(target)?;
        let pending = match target {
            LinkTarget::Peer(id) => PendingRemote::Peer(id),
            LinkTarget::Offer(token) => PendingRemote::Offer(token),
        };
        let active = self.registry.any_transfer_active();
        let result = self.handshake.prepare(pending, active);
        self.check(result)
    }

    /// Act on the opened link: dial the peer or answer the offer.
    pub async fn accept_link(&mut self) -> Result<(), SessionError> {
        match self.handshake.pending().cloned() {
            Some(PendingRemote::Peer(remote)) => self.connect(remote),
            Some(PendingRemote::Offer(token)) => self.accept_remote_token(&token).await,
            None => Err(self.report(HandshakeError::NotReady)),
        }
    }

    /// Dial `remote` through the discovery service.
    pub fn connect(&mut self, remote: EndpointId) -> Result<(), SessionError> {
        self.attach_incoming();
        let active = self.registry.any_transfer_active();
        let result = self.handshake.connect(remote, active);
        self.check(result)
    }

    /// Field-level validation of a manually entered peer id. Does not touch
    /// the session error.
    pub fn set_target_input(&mut self, text: &str) -> Result<(), ValidationError> {
        self.target_input = text.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.target_error = None;
            return Ok(());
        }
        match validate_identifier(trimmed) {
            Ok(_) => {
                self.target_error = None;
                Ok(())
            }
            Err(e) => {
                self.target_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Connect to the manually entered id, once it validates.
    pub fn connect_target(&mut self) -> Result<(), SessionError> {
        match validate_identifier(self.target_input.trim()) {
            Ok(remote) => {
                self.target_error = None;
                self.connect(remote)
            }
            Err(e) => {
                self.target_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    pub async fn accept_remote_token(&mut self, token: &str) -> Result<(), SessionError> {
        let active = self.registry.any_transfer_active();
        let result = self.handshake.accept_remote_token(token, active).await;
        self.check(result)
    }

    pub async fn complete_with_answer_token(&mut self, token: &str) -> Result<(), SessionError> {
        let result = self.handshake.complete_with_answer_token(token).await;
        self.check(result)
    }

    // ── Entry intents ────────────────────────────────────────────────────────

    pub async fn send_message(&mut self, remote: &EndpointId, text: &str) -> Result<(), SessionError> {
        let handle = match self.registry.get(remote) {
            None => return Err(self.report(ConnectionError::UnknownEntry(remote.to_string()))),
            Some(entry) if !entry.is_open() => return Err(self.report(ConnectionError::NotOpen)),
            Some(entry) => entry.handle.clone(),
        };
        let sent = send_text(handle.as_ref(), frame::encode_text(text)).await;
        self.check(sent)?;
        if let Some(entry) = self.registry.get_mut(remote) {
            entry.transfer.record_outbound(text.to_string());
        }
        debug!(event = "message_sent", remote = %remote, len = text.len());
        Ok(())
    }

    pub fn select_file(&mut self, file: FileSource) {
        info!(event = "file_selected", file = %file.name, size = file.size(), "File selected");
        self.selected = Some(file);
    }

    /// Start sending the selected file to `remote` in the background.
    pub fn send_file(&mut self, remote: &EndpointId) -> Result<(), SessionError> {
        let started = match self.selected.clone() {
            Some(file) => Self::spawn_send(
                &mut self.registry,
                remote,
                file,
                self.config.wire,
                self.events_tx.clone(),
            ),
            None => Err(TransferError::NoFileSelected.into()),
        };
        self.check(started)
    }

    fn spawn_send(
        registry: &mut Registry,
        remote: &EndpointId,
        file: FileSource,
        wire: WireShape,
        tx: EventSender,
    ) -> Result<(), SessionError> {
        let entry = registry
            .get_mut(remote)
            .ok_or_else(|| ConnectionError::UnknownEntry(remote.to_string()))?;
        if !entry.is_open() {
            return Err(ConnectionError::NotOpen.into());
        }
        entry.transfer.begin_send(&file.name, file.size())?;

        let stop = SignalOfStop::new();
        entry.stop = Some(stop.clone());
        let handle = entry.handle.clone();
        let serial = entry.serial;
        let remote = remote.clone();
        info!(event = "transfer_send_start", remote = %remote, file = %file.name, size = file.size(), "Sending file");

        tokio::spawn(async move {
            let result = match wire {
                WireShape::Chunked => {
                    let progress_tx = tx.clone();
                    let id = remote.clone();
                    send_chunked(handle, file, stop, move |offset| {
                        let _ = progress_tx.send(SessionEvent::SendProgress {
                            remote: id.clone(),
                            serial,
                            offset,
                        });
                    })
                    .await
                }
                WireShape::WholeFile => send_whole(handle.as_ref(), &file)
                    .await
                    .map(|()| SendOutcome::Completed),
            };
            let _ = tx.send(SessionEvent::SendFinished {
                remote,
                serial,
                result,
            });
        });
        Ok(())
    }

    /// Refuse a connection: tell the remote why, then close it.
    pub async fn reject(&mut self, remote: &EndpointId, reason: &str) -> Result<(), SessionError> {
        let handle = match self.registry.get(remote) {
            Some(entry) => entry.handle.clone(),
            None => return Err(self.report(ConnectionError::UnknownEntry(remote.to_string()))),
        };
        if let Err(e) = send_text(handle.as_ref(), frame::encode_rejection(reason)).await {
            debug!(event = "reject_not_delivered", remote = %remote, error = %e);
        }
        self.registry.remove(remote).await;
        Ok(())
    }

    pub async fn close(&mut self, remote: &EndpointId) -> Result<(), SessionError> {
        if self.registry.remove(remote).await {
            Ok(())
        } else {
            Err(self.report(ConnectionError::UnknownEntry(remote.to_string())))
        }
    }

    /// Drop the entry for `remote` and dial it again through discovery.
    pub async fn reconnect(&mut self, remote: &EndpointId) -> Result<(), SessionError> {
        let Some(discovery) = self.discovery.clone() else {
            return Err(self.report(HandshakeError::NotReady));
        };
        self.attach_incoming();
        self.registry.remove(remote).await;

        let local = self.handshake.local().clone();
        let tx = self.events_tx.clone();
        let remote = remote.clone();
        tokio::spawn(async move {
            let result = match discovery.register(&local).await {
                Ok(_) => discovery.dial(&remote).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(SessionEvent::Redialed { remote, result });
        });
        Ok(())
    }

    /// Re-open every persisted connection. Returns the ids restored.
    pub async fn restore(&mut self) -> Result<Vec<EndpointId>, SessionError> {
        let Some(discovery) = self.discovery.clone() else {
            debug!(event = "restore_skipped", "No discovery service, nothing to restore");
            return Ok(Vec::new());
        };
        self.attach_incoming();
        let registered = discovery.register(self.handshake.local()).await;
        let id = self.check(registered)?;
        self.adopt_local(id);
        Ok(self.registry.restore_all(discovery.as_ref()).await)
    }

    fn adopt_local(&mut self, id: EndpointId) {
        if &id != self.handshake.local() {
            id.persist(self.store.as_ref());
            self.handshake.adopt_local(id);
        }
    }

    // ── Status ───────────────────────────────────────────────────────────────

    fn link(&self) -> Option<String> {
        match self.config.mode {
            HandshakeMode::Relay => matches!(
                self.handshake.state(),
                SessionState::PresentingOffer
                    | SessionState::AwaitingRemoteCode
                    | SessionState::Connected
            )
            .then(|| link::peer_link(&self.config.origin, self.handshake.local())),
            HandshakeMode::Manual => self
                .handshake
                .outgoing_token()
                .filter(|_| self.handshake.is_initiator())
                .map(|token| link::offer_link(&self.config.origin, token)),
        }
    }

    fn response_code(&self) -> Option<String> {
        self.handshake
            .outgoing_token()
            .filter(|_| !self.handshake.is_initiator())
            .map(str::to_string)
    }

    /// Copy the shareable link (or response code) to the clipboard.
    pub fn copy_link(&mut self) -> bool {
        let copied = match self.link().or_else(|| self.response_code()) {
            Some(text) => self.clipboard.copy(&text),
            None => false,
        };
        if copied {
            self.copy_status = Some(COPY_OK_STATUS);
            self.handshake.mark_shared();
        } else {
            warn!(event = "clipboard_failure", "Could not copy the link");
            self.copy_status = Some(COPY_FAILED_STATUS);
        }
        copied
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
        self.handshake.dismiss_error();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.handshake.state().label(),
            local: self.handshake.local().clone(),
            link: self.link(),
            response_code: self.response_code(),
            error: self.error.clone(),
            copy_status: self.copy_status,
            target_input: self.target_input.clone(),
            target_error: self.target_error.as_ref().map(ToString::to_string),
            selected_file: self.selected.as_ref().map(|f| f.name.clone()),
            entries: self
                .registry
                .entries()
                .map(|entry| EntrySnapshot {
                    remote: entry.remote.clone(),
                    status: entry.status,
                    sending: entry.transfer.is_sending(),
                    send_progress: entry.transfer.send_progress(),
                    receiving: entry.transfer.is_receiving(),
                    receive_progress: entry.transfer.receive_progress(),
                    messages: entry.transfer.messages().to_vec(),
                    received: entry.transfer.received_files().to_vec(),
                })
                .collect(),
        }
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Apply one event and report what the operator should see.
    pub async fn handle(&mut self, event: SessionEvent) -> Vec<Notice> {
        let before = self.handshake.state().label();
        let local_before = self.handshake.local().clone();
        let mut notices = Vec::new();

        match event {
            event @ (SessionEvent::TokenReady { .. }
            | SessionEvent::Registered { .. }
            | SessionEvent::Negotiation { .. }
            | SessionEvent::Dialed { .. }
            | SessionEvent::Incoming { .. }) => {
                if let Some(established) = self.handshake.on_event(event) {
                    self.adopt(established, &mut notices);
                }
                if before != "error"
                    && let SessionState::Errored(err) = self.handshake.state()
                {
                    let err = err.clone();
                    notices.push(Notice::Error(self.report(err).to_string()));
                }
            }
            SessionEvent::Redialed { remote, result } => match result {
                Ok(handle) => self.adopt(Established { remote, handle }, &mut notices),
                Err(e) => notices.push(Notice::Error(self.report(e).to_string())),
            },
            SessionEvent::Transport {
                remote,
                serial,
                event,
            } => self.on_transport(remote, serial, event, &mut notices).await,
            SessionEvent::SendProgress {
                remote,
                serial,
                offset,
            } => {
                if let Some(entry) = self.registry.current_mut(&remote, serial) {
                    entry.transfer.advance(offset);
                }
            }
            SessionEvent::SendFinished {
                remote,
                serial,
                result,
            } => {
                let Some(entry) = self.registry.current_mut(&remote, serial) else {
                    return notices;
                };
                entry.stop = None;
                match result {
                    Ok(SendOutcome::Completed) => {
                        entry.transfer.finish_send();
                        notices.push(Notice::FileSent { remote });
                    }
                    Ok(SendOutcome::Cancelled) => entry.transfer.abort_send(),
                    Err(e) => {
                        entry.transfer.abort_send();
                        notices.push(Notice::Error(self.report(e).to_string()));
                    }
                }
            }
        }

        if self.handshake.local() != &local_before {
            self.handshake.local().persist(self.store.as_ref());
        }
        let after = self.handshake.state().label();
        if after != before {
            notices.insert(0, Notice::State(after));
        }
        notices
    }

    fn adopt(&mut self, established: Established, notices: &mut Vec<Notice>) {
        let Established { remote, handle } = established;
        if self.registry.register(remote.clone(), handle).is_some() {
            notices.push(Notice::Connected(remote));
        }
    }

    async fn on_transport(
        &mut self,
        remote: EndpointId,
        serial: u64,
        event: TransportEvent,
        notices: &mut Vec<Notice>,
    ) {
        let Some(entry) = self.registry.current_mut(&remote, serial) else {
            debug!(event = "stale_transport_event", remote = %remote, serial);
            return;
        };
        match event {
            TransportEvent::Open => self.registry.mark(&remote, EntryStatus::Open),
            TransportEvent::Data(payload) => match apply_inbound(&mut entry.transfer, payload) {
                InboundOutcome::Message(text) => notices.push(Notice::Message { remote, text }),
                InboundOutcome::Announced { name, size } => {
                    notices.push(Notice::FileIncoming { remote, name, size })
                }
                InboundOutcome::Completed(file) => notices.push(Notice::FileReceived { remote, file }),
                InboundOutcome::Rejected(reason) => {
                    let err = self.report(ConnectionError::RemoteRejected(reason));
                    notices.push(Notice::Error(err.to_string()));
                    self.registry.remove(&remote).await;
                    notices.push(Notice::Closed(remote));
                }
                InboundOutcome::Progress(_) | InboundOutcome::Ignored => {}
            },
            TransportEvent::Error(detail) => {
                self.registry.mark(&remote, EntryStatus::Errored);
                let err = self.report(ConnectionError::TransportError(detail));
                notices.push(Notice::Error(err.to_string()));
            }
            TransportEvent::Closed => {
                if let Some(stop) = entry.stop.take() {
                    stop.cancel();
                }
                entry.transfer.abort_send();
                entry.transfer.reset();
                self.registry.mark(&remote, EntryStatus::Closed);
                info!(event = "connection_closed", remote = %remote, "Remote channel closed");
                notices.push(Notice::Closed(remote));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CHUNK_SIZE, PEERS_KEY};
    use crate::core::connection::memory::{MemoryConnector, MemoryNetwork, MemoryTransport};
    use crate::core::connection::transport::Payload;
    use crate::core::signaling::{MemoryRelay, RelayDiscovery};
    use crate::core::storage::MemoryStore;
    use crate::utils::clipboard::MemoryClipboard;
    use std::time::Duration;

    fn origin() -> Url {
        Url::parse("http://localhost:5173").unwrap()
    }

    fn manual(network: &MemoryNetwork) -> Session {
        Session::new(
            SessionConfig::new(HandshakeMode::Manual, origin()),
            Arc::new(MemoryStore::default()),
            Arc::new(MemoryConnector::new(network.clone())),
            None,
            Box::new(MemoryClipboard::default()),
        )
    }

    fn relayed(relay: &MemoryRelay, network: &MemoryNetwork, store: Arc<MemoryStore>) -> Session {
        let connector = Arc::new(MemoryConnector::new(network.clone()));
        let discovery = Arc::new(RelayDiscovery::new(Arc::new(relay.clone()), connector.clone()));
        Session::new(
            SessionConfig::new(HandshakeMode::Relay, origin()),
            store,
            connector,
            Some(discovery),
            Box::new(MemoryClipboard::default()),
        )
    }

    /// Apply events until `done` holds.
    async fn drive(session: &mut Session, done: impl Fn(&Session) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(session) {
                let event = session.next_event().await.expect("event channel open");
                session.handle(event).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    fn has_entry(session: &Session, remote: &EndpointId) -> bool {
        session.registry.get(remote).is_some()
    }

    fn is_open(session: &Session, remote: &EndpointId) -> bool {
        session.registry.get(remote).is_some_and(|e| e.is_open())
    }

    /// Two sessions already joined by an in-memory channel.
    async fn joined() -> (Session, Session) {
        let network = MemoryNetwork::new();
        let mut a = manual(&network);
        let mut b = manual(&network);
        let (ha, hb) = MemoryTransport::pair();
        a.registry.register("b".into(), ha).unwrap();
        b.registry.register("a".into(), hb).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_manual_codes_then_chat_and_file() {
        let network = MemoryNetwork::new();
        let mut alice = manual(&network);
        let mut bob = manual(&network);

        alice.start_session().await.unwrap();
        drive(&mut alice, |s| s.snapshot().state == "share-offer").await;
        let link = alice.snapshot().link.expect("offer link");
        assert!(link.starts_with("http://localhost:5173/#session=1"));
        assert!(alice.copy_link());
        assert_eq!(alice.snapshot().copy_status, Some("Copied!"));
        assert_eq!(alice.snapshot().state, "paste-answer");

        bob.open_link(&link).unwrap();
        assert_eq!(bob.snapshot().state, "receiver-generate");
        bob.accept_link().await.unwrap();
        drive(&mut bob, |s| s.snapshot().state == "receiver-share").await;
        let code = bob.snapshot().response_code.expect("response code");
        assert!(bob.snapshot().link.is_none());

        alice.complete_with_answer_token(&code).await.unwrap();
        let bob_id = bob.local().clone();
        let alice_id = alice.local().clone();
        drive(&mut alice, |s| is_open(s, &bob_id)).await;
        drive(&mut bob, |s| is_open(s, &alice_id)).await;
        assert_eq!(alice.snapshot().state, "connected");
        assert_eq!(bob.snapshot().state, "connected");

        alice.send_message(&bob_id, "hello").await.unwrap();
        drive(&mut bob, |s| !s.snapshot().entries[0].messages.is_empty()).await;
        assert_eq!(bob.snapshot().entries[0].messages[0].display(), "Received: hello");
        assert_eq!(alice.snapshot().entries[0].messages[0].display(), "Sent: hello");

        alice.select_file(FileSource::new("big.bin", vec![3u8; 40 * 1024]));
        alice.send_file(&bob_id).unwrap();
        drive(&mut bob, |s| !s.snapshot().entries[0].received.is_empty()).await;
        let received = &bob.snapshot().entries[0].received[0];
        assert_eq!(received.name, "big.bin");
        assert_eq!(received.size, 40 * 1024);
        assert_eq!(bob.snapshot().entries[0].receive_progress, 100);

        drive(&mut alice, |s| !s.snapshot().entries[0].sending).await;
        assert_eq!(alice.snapshot().entries[0].send_progress, 100);
    }

    #[tokio::test]
    async fn test_relay_link_and_connect() {
        let relay = MemoryRelay::new();
        let network = MemoryNetwork::new();
        relay.assign_next("abc-123");
        let mut host = relayed(&relay, &network, Arc::new(MemoryStore::default()));
        let guest_store = Arc::new(MemoryStore::default());
        let mut guest = relayed(&relay, &network, guest_store.clone());

        host.start_session().await.unwrap();
        drive(&mut host, |s| s.snapshot().state == "share-offer").await;
        let link = host.snapshot().link.unwrap();
        assert_eq!(link, "http://localhost:5173/?peer=abc-123");

        guest.open_link(&link).unwrap();
        assert_eq!(guest.snapshot().state, "receiver-generate");
        guest.accept_link().await.unwrap();
        assert_eq!(guest.snapshot().state, "connecting");
        drive(&mut guest, |s| s.snapshot().state == "connected").await;

        let host_id = EndpointId::from("abc-123");
        assert!(has_entry(&guest, &host_id));
        assert_eq!(guest_store.get(PEERS_KEY).as_deref(), Some(r#"["abc-123"]"#));

        let guest_id = guest.local().clone();
        drive(&mut host, |s| has_entry(s, &guest_id)).await;
        assert_eq!(host.snapshot().state, "connected");
    }

    #[tokio::test]
    async fn test_restore_redials_persisted_peers() {
        let relay = MemoryRelay::new();
        let network = MemoryNetwork::new();
        relay.assign_next("abc-123");
        let mut host = relayed(&relay, &network, Arc::new(MemoryStore::default()));
        host.start_session().await.unwrap();
        drive(&mut host, |s| s.snapshot().state == "share-offer").await;

        let store = Arc::new(MemoryStore::default());
        store.set(PEERS_KEY, r#"["abc-123"]"#);
        let mut guest = relayed(&relay, &network, store);
        let restored = guest.restore().await.unwrap();
        assert_eq!(restored, vec![EndpointId::from("abc-123")]);
        assert_eq!(guest.snapshot().entries.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_skips_unknown_ids_and_keeps_them() {
        let relay = MemoryRelay::new();
        let network = MemoryNetwork::new();
        relay.assign_next("abc-123");
        let mut host = relayed(&relay, &network, Arc::new(MemoryStore::default()));
        host.start_session().await.unwrap();
        drive(&mut host, |s| s.snapshot().state == "share-offer").await;

        let store = Arc::new(MemoryStore::default());
        store.set(PEERS_KEY, r#"["gone","abc-123","missing"]"#);
        let mut guest = relayed(&relay, &network, store.clone());
        let restored = guest.restore().await.unwrap();
        assert_eq!(restored, vec![EndpointId::from("abc-123")]);
        let remotes: Vec<_> = guest.snapshot().entries.into_iter().map(|e| e.remote).collect();
        assert_eq!(remotes, vec![EndpointId::from("abc-123")]);
        assert_eq!(guest.snapshot().error, None);
        assert_eq!(
            store.get(PEERS_KEY).as_deref(),
            Some(r#"["gone","abc-123","missing"]"#)
        );
    }

    #[tokio::test]
    async fn test_send_preconditions() {
        let (mut a, _b) = joined().await;
        let b_id = EndpointId::from("b");
        drive(&mut a, |s| is_open(s, &b_id)).await;

        let err = a.send_file(&b_id).unwrap_err();
        assert_eq!(err, SessionError::Transfer(TransferError::NoFileSelected));
        assert_eq!(a.snapshot().error.as_deref(), Some("no file selected"));

        let err = a.send_message(&"nobody".into(), "hi").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Connection(ConnectionError::UnknownEntry("nobody".into()))
        );
        assert_eq!(a.snapshot().error.as_deref(), Some("no connection to nobody"));

        a.select_file(FileSource::new("f.bin", vec![0u8; 200 * 1024]));
        a.send_file(&b_id).unwrap();
        assert_eq!(
            a.send_file(&b_id).unwrap_err(),
            SessionError::Transfer(TransferError::TransferAlreadyInProgress)
        );

        a.dismiss_error();
        assert_eq!(a.snapshot().error, None);
    }

    #[tokio::test]
    async fn test_close_stops_chunked_send() {
        let network = MemoryNetwork::new();
        let mut a = manual(&network);
        let mut b = manual(&network);
        let (ha, hb) = MemoryTransport::pair();
        a.registry.register("b".into(), ha.clone()).unwrap();
        b.registry.register("a".into(), hb).unwrap();
        let b_id = EndpointId::from("b");

        let file = FileSource::new("big.bin", vec![7u8; 40 * CHUNK_SIZE]);
        a.select_file(file);
        a.send_file(&b_id).unwrap();
        tokio::task::yield_now().await;
        a.close(&b_id).await.unwrap();
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let chunks = ha
            .sent()
            .iter()
            .filter(|p| matches!(p, Payload::Binary(_)))
            .count();
        assert!(chunks < 40, "sent {chunks} chunks after close");

        let a_id = EndpointId::from("a");
        drive(&mut b, |s| {
            s.registry.get(&a_id).map(|e| e.status) == Some(EntryStatus::Closed)
        })
        .await;
        let entry = &b.snapshot().entries[0];
        assert!(entry.received.is_empty());
        assert!(!entry.receiving);
    }

    #[tokio::test]
    async fn test_transport_error_marks_entry_errored() {
        let network = MemoryNetwork::new();
        let mut a = manual(&network);
        let (ha, _hb) = MemoryTransport::pair();
        a.registry.register("b".into(), ha.clone()).unwrap();
        let b_id = EndpointId::from("b");
        drive(&mut a, |s| is_open(s, &b_id)).await;

        ha.fail("boom");
        drive(&mut a, |s| s.snapshot().entries[0].status == EntryStatus::Errored).await;
        assert_eq!(a.snapshot().error.as_deref(), Some("connection error: boom"));
        assert_eq!(
            a.send_message(&b_id, "hi").await.unwrap_err(),
            SessionError::Connection(ConnectionError::NotOpen)
        );
    }

    #[tokio::test]
    async fn test_rejection_surfaces_reason_and_closes() {
        let (mut a, mut b) = joined().await;
        b.reject(&"a".into(), "busy").await.unwrap();
        assert!(b.snapshot().entries.is_empty());

        drive(&mut a, |s| s.snapshot().entries.is_empty()).await;
        assert_eq!(a.snapshot().error.as_deref(), Some("busy"));
    }

    #[tokio::test]
    async fn test_close_marks_remote_closed() {
        let (mut a, mut b) = joined().await;
        a.close(&"b".into()).await.unwrap();
        assert!(a.snapshot().entries.is_empty());
        assert!(a.close(&"b".into()).await.is_err());

        drive(&mut b, |s| s.snapshot().entries[0].status == EntryStatus::Closed).await;
        assert_eq!(
            b.send_message(&"a".into(), "late").await.unwrap_err(),
            SessionError::Connection(ConnectionError::NotOpen)
        );
    }

    #[tokio::test]
    async fn test_copy_failure_status() {
        let network = MemoryNetwork::new();
        let mut s = Session::new(
            SessionConfig::new(HandshakeMode::Manual, origin()),
            Arc::new(MemoryStore::default()),
            Arc::new(MemoryConnector::new(network)),
            None,
            Box::new(MemoryClipboard::refusing()),
        );
        s.start_session().await.unwrap();
        drive(&mut s, |s| s.snapshot().state == "share-offer").await;
        assert!(!s.copy_link());
        assert_eq!(s.snapshot().copy_status, Some("Failed to copy"));
        assert_eq!(s.snapshot().state, "share-offer");
    }

    #[tokio::test]
    async fn test_target_input_validation() {
        let network = MemoryNetwork::new();
        let mut s = manual(&network);
        assert_eq!(
            s.set_target_input("abc"),
            Err(ValidationError::MalformedIdentifier)
        );
        assert!(s.snapshot().target_error.is_some());
        assert_eq!(s.snapshot().error, None);
        assert!(s.connect_target().is_err());

        s.set_target_input("123e4567-e89b-42d3-a456-426614174000").unwrap();
        assert_eq!(s.snapshot().target_error, None);
        // Manual mode has no discovery service to dial through.
        assert_eq!(
            s.connect_target().unwrap_err(),
            SessionError::Handshake(HandshakeError::NotReady)
        );
    }

    #[tokio::test]
    async fn test_invalid_offer_code_sets_error() {
        let network = MemoryNetwork::new();
        let mut s = manual(&network);
        assert!(s.accept_remote_token("1!!!").await.is_err());
        assert_eq!(s.snapshot().state, "error");
        assert!(s.snapshot().error.unwrap().starts_with("invalid connection code"));
        s.dismiss_error();
        assert_eq!(s.snapshot().state, "init");
    }
}
