//! Handshake state machine: from "no session" to "channel open".
//!
//! Two modes share one state set:
//!
//! - **Manual**: the initiator gathers an offer into a shareable code, the
//!   responder turns it into a response code, and the initiator applies that
//!   answer. Candidates are batched into the codes, so gathering is
//!   debounced before each code is produced.
//! - **Relay**: identities are assigned by the discovery service and the
//!   initiator just shares its id; the responder dials it.
//!
//! All slow work (gathering, registering, dialing) runs in spawned tasks
//! that report back through [`SessionEvent`]s tagged with the attempt that
//! started them. [`Handshake::on_event`] drops reports from superseded
//! attempts. An opened channel is handed back as [`Established`] and the
//! machine tracks nothing about it afterwards.

use crate::core::config::{CANDIDATE_SETTLE_CEILING, CANDIDATE_SETTLE_DELAY, ICE_GATHER_TIMEOUT};
use crate::core::connection::negotiator::{
    Connector, NegotiationEvent, Negotiator, RouteCandidate, SessionDescription, apply_candidates,
};
use crate::core::connection::ticket::Ticket;
use crate::core::connection::transport::TransportHandle;
use crate::core::error::HandshakeError;
use crate::core::events::{EventSender, SessionEvent};
use crate::core::identity::EndpointId;
use crate::core::signaling::Discovery;
use crate::utils::debounce::{DebounceTiming, Observation, settle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeMode {
    #[default]
    Manual,
    Relay,
}

/// Candidate gathering limits for manual codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherSettings {
    pub timing: DebounceTiming,
    /// Give up when nothing at all was gathered within this long.
    pub overall: Duration,
}

impl Default for GatherSettings {
    fn default() -> Self {
        Self {
            timing: DebounceTiming {
                settle: CANDIDATE_SETTLE_DELAY,
                ceiling: CANDIDATE_SETTLE_CEILING,
            },
            overall: ICE_GATHER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingLocalReady,
    PresentingOffer,
    AwaitingRemoteCode,
    ReadyToAccept,
    PresentingAcceptCode,
    Connecting,
    Connected,
    Errored(HandshakeError),
}

impl SessionState {
    /// Stable name shown by the presentation layer.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "init",
            Self::AwaitingLocalReady => "gathering",
            Self::PresentingOffer => "share-offer",
            Self::AwaitingRemoteCode => "paste-answer",
            Self::ReadyToAccept => "receiver-generate",
            Self::PresentingAcceptCode => "receiver-share",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

/// What an opened link asks the operator to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRemote {
    /// Dial this id through discovery.
    Peer(EndpointId),
    /// Answer this offer code.
    Offer(String),
}

/// A channel that finished negotiating, ready for the registry.
pub struct Established {
    pub remote: EndpointId,
    pub handle: Arc<dyn TransportHandle>,
}

enum GatherStep {
    Offer,
    Answer {
        offer: SessionDescription,
        candidates: Vec<RouteCandidate>,
    },
}

pub struct Handshake {
    mode: HandshakeMode,
    state: SessionState,
    role: Role,
    attempt: u64,
    local: EndpointId,
    remote: Option<EndpointId>,
    pending: Option<PendingRemote>,
    negotiator: Option<Arc<dyn Negotiator>>,
    channel_open: bool,
    outgoing: Option<String>,
    applied_answer: Option<String>,
    gather: GatherSettings,
    connector: Arc<dyn Connector>,
    discovery: Option<Arc<dyn Discovery>>,
    events: EventSender,
}

impl Handshake {
    pub fn new(
        mode: HandshakeMode,
        local: EndpointId,
        gather: GatherSettings,
        connector: Arc<dyn Connector>,
        discovery: Option<Arc<dyn Discovery>>,
        events: EventSender,
    ) -> Self {
        Self {
            mode,
            state: SessionState::Idle,
            role: Role::Initiator,
            attempt: 0,
            local,
            remote: None,
            pending: None,
            negotiator: None,
            channel_open: false,
            outgoing: None,
            applied_answer: None,
            gather,
            connector,
            discovery,
            events,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> HandshakeMode {
        self.mode
    }

    pub fn local(&self) -> &EndpointId {
        &self.local
    }

    pub fn remote(&self) -> Option<&EndpointId> {
        self.remote.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingRemote> {
        self.pending.as_ref()
    }

    /// Code the operator should hand to the other side, once gathered.
    pub fn outgoing_token(&self) -> Option<&str> {
        self.outgoing.as_deref()
    }

    pub fn is_initiator(&self) -> bool {
        self.role == Role::Initiator
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!(
                event = "handshake_state",
                from = self.state.label(),
                to = next.label(),
                attempt = self.attempt,
                "Handshake state changed"
            );
        }
        self.state = next;
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(event = "handshake_failure", error = %err, attempt = self.attempt, "Handshake failed");
        self.set_state(SessionState::Errored(err.clone()));
        err
    }

    fn can_begin(&self, transfer_active: bool) -> bool {
        match self.state {
            SessionState::Idle
            | SessionState::Errored(_)
            | SessionState::ReadyToAccept
            | SessionState::PresentingOffer
            | SessionState::AwaitingRemoteCode => true,
            SessionState::Connected => !transfer_active,
            SessionState::AwaitingLocalReady
            | SessionState::PresentingAcceptCode
            | SessionState::Connecting => false,
        }
    }

    /// Drop the current negotiation. One that never opened a channel is
    /// closed; an open one lives on inside its transport.
    fn retire(&mut self) {
        if let Some(negotiator) = self.negotiator.take()
            && !self.channel_open
        {
            tokio::spawn(async move { negotiator.close().await });
        }
        self.channel_open = false;
    }

    fn begin_attempt(&mut self, role: Role) -> u64 {
        self.retire();
        self.attempt += 1;
        self.role = role;
        self.remote = None;
        self.pending = None;
        self.outgoing = None;
        self.applied_answer = None;
        self.attempt
    }

    async fn fresh_negotiator(
        &mut self,
    ) -> Result<(Arc<dyn Negotiator>, mpsc::UnboundedReceiver<NegotiationEvent>), HandshakeError> {
        let negotiator = match self.connector.negotiator().await {
            Ok(negotiator) => negotiator,
            Err(e) => return Err(self.fail(e)),
        };
        let Some(events) = negotiator.events() else {
            return Err(self.fail(HandshakeError::PeerError("negotiation events already taken".into())));
        };
        self.negotiator = Some(negotiator.clone());
        Ok((negotiator, events))
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Begin a new attempt as initiator, superseding any pending offer.
    pub async fn start(&mut self, transfer_active: bool) -> Result<(), HandshakeError> {
        if !self.can_begin(transfer_active) {
            return Err(HandshakeError::AlreadyInProgress);
        }
        let discovery = match self.mode {
            HandshakeMode::Manual => None,
            HandshakeMode::Relay => Some(self.require_discovery()?),
        };
        let attempt = self.begin_attempt(Role::Initiator);
        self.set_state(SessionState::AwaitingLocalReady);

        match discovery {
            None => {
                let (negotiator, events) = self.fresh_negotiator().await?;
                self.spawn_gathering(attempt, negotiator, events, GatherStep::Offer);
            }
            Some(discovery) => {
                let local = self.local.clone();
                let tx = self.events.clone();
                tokio::spawn(async move {
                    let result = discovery.register(&local).await;
                    let _ = tx.send(SessionEvent::Registered { attempt, result });
                });
            }
        }
        Ok(())
    }

    /// Remember what an opened link points at and wait for the operator.
    pub fn prepare(&mut self, pending: PendingRemote, transfer_active: bool) -> Result<(), HandshakeError> {
        if !self.can_begin(transfer_active) {
            return Err(HandshakeError::AlreadyInProgress);
        }
        self.begin_attempt(Role::Responder);
        if let PendingRemote::Peer(remote) = &pending {
            self.remote = Some(remote.clone());
        }
        self.pending = Some(pending);
        self.set_state(SessionState::ReadyToAccept);
        Ok(())
    }

    /// The operator shared the offer; now waiting for the response code.
    pub fn mark_shared(&mut self) {
        if self.mode == HandshakeMode::Manual && self.state == SessionState::PresentingOffer {
            self.set_state(SessionState::AwaitingRemoteCode);
        }
    }

    /// Responder: answer a remote offer code.
    ///
    /// A code that does not decode moves to `Errored(InvalidToken)` and
    /// changes nothing else.
    pub async fn accept_remote_token(
        &mut self,
        token: &str,
        transfer_active: bool,
    ) -> Result<(), HandshakeError> {
        if !self.can_begin(transfer_active) {
            return Err(HandshakeError::AlreadyInProgress);
        }
        let ticket = match Ticket::parse(token) {
            Ok(ticket) => ticket,
            Err(e) => return Err(self.fail(e.into())),
        };

        let attempt = self.begin_attempt(Role::Responder);
        self.remote = Some(ticket.origin.unwrap_or_else(EndpointId::generate));
        self.set_state(SessionState::AwaitingLocalReady);

        let (negotiator, events) = self.fresh_negotiator().await?;
        self.spawn_gathering(
            attempt,
            negotiator,
            events,
            GatherStep::Answer {
                offer: ticket.description,
                candidates: ticket.candidates,
            },
        );
        Ok(())
    }

    /// Initiator: apply the response code. Repeating the same code once it
    /// was applied is a no-op.
    pub async fn complete_with_answer_token(&mut self, token: &str) -> Result<(), HandshakeError> {
        let token = token.trim();
        if matches!(self.state, SessionState::Connecting | SessionState::Connected)
            && self.applied_answer.as_deref() == Some(token)
        {
            debug!(event = "answer_already_applied", "Ignoring repeated response code");
            return Ok(());
        }
        if !matches!(
            self.state,
            SessionState::PresentingOffer | SessionState::AwaitingRemoteCode
        ) || self.role != Role::Initiator
        {
            return Err(HandshakeError::NotReady);
        }
        let negotiator = self.negotiator.clone().ok_or(HandshakeError::NotReady)?;

        let ticket = match Ticket::parse(token) {
            Ok(ticket) => ticket,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = negotiator.apply_answer(&ticket.description).await {
            return Err(self.fail(e));
        }
        let applied = apply_candidates(negotiator.as_ref(), &ticket.candidates).await;
        debug!(event = "answer_applied", candidates = applied, "Response code applied");

        self.remote = Some(ticket.origin.unwrap_or_else(EndpointId::generate));
        self.applied_answer = Some(token.to_string());
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Relay mode: dial `remote` through discovery.
    pub fn connect(&mut self, remote: EndpointId, transfer_active: bool) -> Result<(), HandshakeError> {
        let discovery = self.require_discovery()?;
        if !self.can_begin(transfer_active) {
            return Err(HandshakeError::AlreadyInProgress);
        }
        let attempt = self.begin_attempt(Role::Initiator);
        self.remote = Some(remote.clone());
        self.set_state(SessionState::Connecting);

        let local = self.local.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = match discovery.register(&local).await {
                Ok(id) => {
                    let _ = tx.send(SessionEvent::Registered {
                        attempt,
                        result: Ok(id),
                    });
                    discovery.dial(&remote).await
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(SessionEvent::Dialed {
                attempt,
                remote,
                result,
            });
        });
        Ok(())
    }

    /// Take an identity confirmed by the discovery service outside an attempt.
    pub fn adopt_local(&mut self, id: EndpointId) {
        if id != self.local {
            info!(event = "identity_assigned", id = %id, "Discovery assigned local identity");
            self.local = id;
        }
    }

    pub fn dismiss_error(&mut self) {
        if matches!(self.state, SessionState::Errored(_)) {
            self.set_state(SessionState::Idle);
        }
    }

    fn require_discovery(&self) -> Result<Arc<dyn Discovery>, HandshakeError> {
        match &self.discovery {
            Some(discovery) => Ok(discovery.clone()),
            None => Err(HandshakeError::NotReady),
        }
    }

    // ── Event intake ─────────────────────────────────────────────────────────

    /// Apply a handshake-related event. Returns the channel when one opened.
    pub fn on_event(&mut self, event: SessionEvent) -> Option<Established> {
        match event {
            SessionEvent::TokenReady { attempt, result } => {
                if attempt != self.attempt {
                    debug!(event = "stale_token", attempt, "Dropping code from a superseded attempt");
                    return None;
                }
                match result {
                    Ok(token) => {
                        self.outgoing = Some(token);
                        if self.state == SessionState::AwaitingLocalReady {
                            let next = match self.role {
                                Role::Initiator => SessionState::PresentingOffer,
                                Role::Responder => SessionState::PresentingAcceptCode,
                            };
                            self.set_state(next);
                        }
                    }
                    Err(e) => {
                        self.fail(e);
                    }
                }
                None
            }
            SessionEvent::Registered { attempt, result } => {
                match result {
                    Ok(id) => {
                        self.adopt_local(id);
                        if attempt == self.attempt && self.state == SessionState::AwaitingLocalReady {
                            self.set_state(SessionState::PresentingOffer);
                        }
                    }
                    Err(e) if attempt == self.attempt => {
                        self.fail(e);
                    }
                    Err(_) => {}
                }
                None
            }
            SessionEvent::Negotiation { attempt, event } => {
                if attempt != self.attempt {
                    return None;
                }
                match event {
                    NegotiationEvent::ChannelOpen(handle) => {
                        self.channel_open = true;
                        self.set_state(SessionState::Connected);
                        let remote = self.remote.clone().unwrap_or_else(EndpointId::generate);
                        Some(Established { remote, handle })
                    }
                    NegotiationEvent::Failed(detail) => {
                        if self.state != SessionState::Connected {
                            self.fail(HandshakeError::PeerError(detail));
                        }
                        None
                    }
                    NegotiationEvent::Candidate(_) | NegotiationEvent::GatheringComplete => {
                        debug!(event = "late_candidate", "Candidate after the code was produced");
                        None
                    }
                }
            }
            SessionEvent::Dialed {
                attempt,
                remote,
                result,
            } => match result {
                Ok(handle) => {
                    if attempt == self.attempt {
                        self.set_state(SessionState::Connected);
                    }
                    Some(Established { remote, handle })
                }
                Err(e) => {
                    if attempt == self.attempt {
                        self.fail(e);
                    }
                    None
                }
            },
            SessionEvent::Incoming { remote, handle } => {
                if matches!(
                    self.state,
                    SessionState::Idle
                        | SessionState::PresentingOffer
                        | SessionState::AwaitingRemoteCode
                        | SessionState::ReadyToAccept
                ) {
                    self.set_state(SessionState::Connected);
                }
                Some(Established { remote, handle })
            }
            _ => None,
        }
    }

    /// Produce the local description, debounce candidate gathering, then
    /// report the code and keep forwarding negotiation events.
    fn spawn_gathering(
        &self,
        attempt: u64,
        negotiator: Arc<dyn Negotiator>,
        mut events: mpsc::UnboundedReceiver<NegotiationEvent>,
        step: GatherStep,
    ) {
        let tx = self.events.clone();
        let gather = self.gather;
        let local = self.local.clone();

        tokio::spawn(async move {
            let description = match step {
                GatherStep::Offer => negotiator.create_offer().await,
                GatherStep::Answer { offer, candidates } => {
                    let answer = negotiator.accept_offer(&offer).await;
                    if answer.is_ok() {
                        apply_candidates(negotiator.as_ref(), &candidates).await;
                    }
                    answer
                }
            };
            let description = match description {
                Ok(description) => description,
                Err(e) => {
                    let _ = tx.send(SessionEvent::TokenReady {
                        attempt,
                        result: Err(e),
                    });
                    return;
                }
            };

            let mut candidates = Vec::new();
            let mut deferred = Vec::new();
            let mut failure = None;
            let settled = settle(&mut events, gather.timing, gather.overall, |event| match event {
                NegotiationEvent::Candidate(candidate) => {
                    candidates.push(candidate);
                    Observation::Reset
                }
                NegotiationEvent::GatheringComplete => Observation::Final,
                NegotiationEvent::Failed(detail) => {
                    failure = Some(detail);
                    Observation::Abort
                }
                other => {
                    deferred.push(other);
                    Observation::Ignore
                }
            })
            .await;

            let result = if settled.is_finalized() {
                info!(
                    event = "candidate_gathering_settled",
                    how = ?settled,
                    candidates = candidates.len(),
                    "Candidate gathering settled"
                );
                Ok(Ticket::new(description, candidates).with_origin(local).export())
            } else if let Some(detail) = failure {
                Err(HandshakeError::PeerError(detail))
            } else {
                Err(HandshakeError::PeerError(
                    "no route candidates were gathered in time".into(),
                ))
            };
            let gathered = result.is_ok();
            if tx.send(SessionEvent::TokenReady { attempt, result }).is_err() || !gathered {
                return;
            }

            for event in deferred {
                let _ = tx.send(SessionEvent::Negotiation { attempt, event });
            }
            while let Some(event) = events.recv().await {
                if tx.send(SessionEvent::Negotiation { attempt, event }).is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::memory::{MemoryConnector, MemoryNetwork};
    use crate::core::error::DecodeError;
    use crate::core::events::EventReceiver;
    use crate::core::signaling::{MemoryRelay, RelayDiscovery};

    struct Side {
        handshake: Handshake,
        rx: EventReceiver,
    }

    impl Side {
        fn manual(network: &MemoryNetwork, id: &str) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let handshake = Handshake::new(
                HandshakeMode::Manual,
                id.into(),
                GatherSettings::default(),
                Arc::new(MemoryConnector::new(network.clone())),
                None,
                tx,
            );
            Self { handshake, rx }
        }

        fn relay(relay: &MemoryRelay, network: &MemoryNetwork, id: &str) -> (Self, Arc<RelayDiscovery>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(MemoryConnector::new(network.clone()));
            let discovery = Arc::new(RelayDiscovery::new(Arc::new(relay.clone()), connector.clone()));
            let handshake = Handshake::new(
                HandshakeMode::Relay,
                id.into(),
                GatherSettings::default(),
                connector,
                Some(discovery.clone()),
                tx,
            );
            (Self { handshake, rx }, discovery)
        }

        /// Feed the next event to the machine.
        async fn pump(&mut self) -> Option<Established> {
            let event = self.rx.recv().await.expect("event channel open");
            self.handshake.on_event(event)
        }

        fn label(&self) -> &'static str {
            self.handshake.state().label()
        }
    }

    #[tokio::test]
    async fn test_manual_exchange_connects_both_sides() {
        let network = MemoryNetwork::new();
        let mut alice = Side::manual(&network, "alice");
        let mut bob = Side::manual(&network, "bob");

        alice.handshake.start(false).await.unwrap();
        assert_eq!(alice.label(), "gathering");
        assert!(alice.pump().await.is_none());
        assert_eq!(alice.label(), "share-offer");
        let offer = alice.handshake.outgoing_token().unwrap().to_string();
        alice.handshake.mark_shared();
        assert_eq!(alice.label(), "paste-answer");

        bob.handshake.accept_remote_token(&offer, false).await.unwrap();
        assert_eq!(bob.handshake.remote().map(EndpointId::as_str), Some("alice"));
        assert!(bob.pump().await.is_none());
        assert_eq!(bob.label(), "receiver-share");
        let answer = bob.handshake.outgoing_token().unwrap().to_string();

        alice.handshake.complete_with_answer_token(&answer).await.unwrap();
        assert_eq!(alice.label(), "connecting");

        let opened = alice.pump().await.expect("initiator channel");
        assert_eq!(opened.remote.as_str(), "bob");
        assert_eq!(alice.label(), "connected");

        let opened = bob.pump().await.expect("responder channel");
        assert_eq!(opened.remote.as_str(), "alice");
        assert_eq!(bob.label(), "connected");

        // Same response code again changes nothing.
        alice.handshake.complete_with_answer_token(&answer).await.unwrap();
        assert_eq!(alice.label(), "connected");

        // A connected side starts over only once its transfers are done.
        assert_eq!(
            bob.handshake.accept_remote_token(&offer, true).await,
            Err(HandshakeError::AlreadyInProgress)
        );
        assert_eq!(
            alice.handshake.prepare(PendingRemote::Peer("carol".into()), true),
            Err(HandshakeError::AlreadyInProgress)
        );
        assert_eq!(bob.label(), "connected");
        assert_eq!(alice.label(), "connected");
        alice
            .handshake
            .prepare(PendingRemote::Peer("carol".into()), false)
            .unwrap();
        assert_eq!(alice.label(), "receiver-generate");
    }

    #[tokio::test]
    async fn test_invalid_token_moves_to_error_only() {
        let network = MemoryNetwork::new();
        let mut bob = Side::manual(&network, "bob");

        let err = bob.handshake.accept_remote_token("not a code", false).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidToken(DecodeError::UnknownVersion('n'))));
        assert_eq!(bob.label(), "error");
        assert!(bob.handshake.remote().is_none());
        assert!(bob.handshake.outgoing_token().is_none());
        assert!(bob.rx.try_recv().is_err());

        bob.handshake.dismiss_error();
        assert_eq!(bob.label(), "init");
    }

    #[tokio::test]
    async fn test_answer_before_offer_is_not_ready() {
        let network = MemoryNetwork::new();
        let mut alice = Side::manual(&network, "alice");
        assert_eq!(
            alice.handshake.complete_with_answer_token("1abc").await,
            Err(HandshakeError::NotReady)
        );
        assert_eq!(alice.label(), "init");
    }

    #[tokio::test]
    async fn test_start_is_refused_mid_attempt() {
        let network = MemoryNetwork::new();
        let mut alice = Side::manual(&network, "alice");
        alice.handshake.start(false).await.unwrap();
        assert_eq!(
            alice.handshake.start(false).await,
            Err(HandshakeError::AlreadyInProgress)
        );
        alice.pump().await;
        // Superseding a shown offer is fine.
        alice.handshake.start(false).await.unwrap();
        alice.pump().await;
        assert_eq!(alice.label(), "share-offer");
    }

    #[tokio::test]
    async fn test_gathering_failure_reports_peer_error() {
        let network = MemoryNetwork::new();
        network.set_failure(Some("no network"));
        let mut alice = Side::manual(&network, "alice");
        alice.handshake.start(false).await.unwrap();
        alice.pump().await;
        assert_eq!(
            alice.handshake.state(),
            &SessionState::Errored(HandshakeError::PeerError("no network".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_gathered_times_out() {
        let network = MemoryNetwork::new();
        network.set_candidates(0, false);
        let mut alice = Side::manual(&network, "alice");
        alice.handshake.start(false).await.unwrap();
        alice.pump().await;
        assert!(matches!(
            alice.handshake.state(),
            SessionState::Errored(HandshakeError::PeerError(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_link_then_connect() {
        let relay = MemoryRelay::new();
        let network = MemoryNetwork::new();
        relay.assign_next("abc-123");
        let (mut host, host_discovery) = Side::relay(&relay, &network, "host-local");
        let (mut guest, _) = Side::relay(&relay, &network, "guest");
        let mut incoming = host_discovery.incoming().unwrap();

        host.handshake.start(false).await.unwrap();
        host.pump().await;
        assert_eq!(host.handshake.local().as_str(), "abc-123");
        assert_eq!(host.label(), "share-offer");

        guest
            .handshake
            .prepare(PendingRemote::Peer("abc-123".into()), false)
            .unwrap();
        assert_eq!(guest.label(), "receiver-generate");
        guest.handshake.connect("abc-123".into(), false).unwrap();
        assert_eq!(guest.label(), "connecting");

        // Registered, then Dialed.
        assert!(guest.pump().await.is_none());
        let opened = guest.pump().await.expect("dial opens a channel");
        assert_eq!(opened.remote.as_str(), "abc-123");
        assert_eq!(guest.label(), "connected");

        let (remote, handle) = incoming.recv().await.unwrap();
        let accepted = host
            .handshake
            .on_event(SessionEvent::Incoming { remote, handle })
            .unwrap();
        assert_eq!(accepted.remote.as_str(), "guest");
        assert_eq!(host.label(), "connected");
    }

    #[tokio::test]
    async fn test_connect_without_discovery_is_not_ready() {
        let network = MemoryNetwork::new();
        let mut alice = Side::manual(&network, "alice");
        assert_eq!(
            alice.handshake.connect("bob".into(), false),
            Err(HandshakeError::NotReady)
        );
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(SessionState::Idle.label(), "init");
        assert_eq!(SessionState::ReadyToAccept.label(), "receiver-generate");
        assert_eq!(
            SessionState::Errored(HandshakeError::NotReady).label(),
            "error"
        );
    }
}
