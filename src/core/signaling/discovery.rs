//! Discovery-service mode: identities and negotiation routed through a relay.
//!
//! [`RelayDiscovery`] registers with the relay (`hello`/`welcome`), then
//! runs one router task that answers every incoming offer automatically
//! and feeds answers/candidates to outgoing dials. Candidates trickle in
//! both directions as they are discovered; no settle timer is needed.

use super::relay::{RelayMessage, SignalPayload, SignalingPipe};
use crate::core::config::{CONNECTION_TIMEOUT, RELAY_WELCOME_TIMEOUT};
use crate::core::connection::negotiator::{Connector, NegotiationEvent, Negotiator};
use crate::core::connection::transport::TransportHandle;
use crate::core::error::HandshakeError;
use crate::core::identity::EndpointId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// An inbound channel opened by a remote endpoint.
pub type IncomingConnection = (EndpointId, Arc<dyn TransportHandle>);

type DialResult = Result<Arc<dyn TransportHandle>, HandshakeError>;

/// Identity assignment plus dial/accept by identifier.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Register (once) and return the id the service routes to us.
    async fn register(&self, preferred: &EndpointId) -> Result<EndpointId, HandshakeError>;

    /// Open a channel to `remote`; resolves once the channel is open.
    async fn dial(&self, remote: &EndpointId) -> Result<Arc<dyn TransportHandle>, HandshakeError>;

    /// Stream of channels opened by remote endpoints. Handed out once.
    fn incoming(&self) -> Option<mpsc::UnboundedReceiver<IncomingConnection>>;
}

struct Registration {
    id: EndpointId,
    outbound: mpsc::UnboundedSender<RelayMessage>,
}

#[derive(Default)]
struct Routes {
    /// Negotiations keyed by remote id, both directions.
    negotiators: HashMap<EndpointId, Arc<dyn Negotiator>>,
    /// Dials still waiting for their channel.
    pending_dials: HashMap<EndpointId, oneshot::Sender<DialResult>>,
}

pub struct RelayDiscovery {
    pipe: Arc<dyn SignalingPipe>,
    connector: Arc<dyn Connector>,
    registration: tokio::sync::Mutex<Option<Registration>>,
    routes: Arc<Mutex<Routes>>,
    incoming_tx: mpsc::UnboundedSender<IncomingConnection>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingConnection>>>,
    dial_timeout: Duration,
}

impl RelayDiscovery {
    pub fn new(pipe: Arc<dyn SignalingPipe>, connector: Arc<dyn Connector>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            pipe,
            connector,
            registration: tokio::sync::Mutex::new(None),
            routes: Arc::new(Mutex::new(Routes::default())),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            dial_timeout: CONNECTION_TIMEOUT,
        }
    }

    async fn local(&self) -> Result<(EndpointId, mpsc::UnboundedSender<RelayMessage>), HandshakeError> {
        let guard = self.registration.lock().await;
        let registration = guard.as_ref().ok_or(HandshakeError::NotReady)?;
        Ok((registration.id.clone(), registration.outbound.clone()))
    }

    fn take_pending(routes: &Mutex<Routes>, remote: &EndpointId) -> Option<oneshot::Sender<DialResult>> {
        routes.lock().ok()?.pending_dials.remove(remote)
    }

    fn negotiator_for(routes: &Mutex<Routes>, remote: &EndpointId) -> Option<Arc<dyn Negotiator>> {
        routes.lock().ok()?.negotiators.get(remote).cloned()
    }
}

#[async_trait]
impl Discovery for RelayDiscovery {
    async fn register(&self, preferred: &EndpointId) -> Result<EndpointId, HandshakeError> {
        let mut guard = self.registration.lock().await;
        if let Some(registration) = guard.as_ref() {
            return Ok(registration.id.clone());
        }

        let mut link = self.pipe.connect().await?;
        link.send(RelayMessage::Hello {
            id: Some(preferred.clone()),
        })?;

        let id = match tokio::time::timeout(RELAY_WELCOME_TIMEOUT, link.recv()).await {
            Ok(Some(RelayMessage::Welcome { id })) => id,
            Ok(Some(RelayMessage::Error { reason, .. })) => return Err(HandshakeError::PeerError(reason)),
            Ok(Some(other)) => {
                return Err(HandshakeError::PeerError(format!("unexpected relay reply: {other:?}")));
            }
            Ok(None) => return Err(HandshakeError::PeerError("relay closed the connection".into())),
            Err(_) => return Err(HandshakeError::PeerError("relay did not answer in time".into())),
        };
        info!(event = "relay_registered", id = %id, "Registered with discovery relay");

        let router = Router {
            local: id.clone(),
            outbound: link.outbound.clone(),
            connector: self.connector.clone(),
            routes: self.routes.clone(),
            incoming: self.incoming_tx.clone(),
        };
        let mut inbound = link.inbound;
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                router.handle(message).await;
            }
            warn!(event = "relay_lost", "Discovery relay connection ended");
            router.fail_pending("relay connection lost");
        });

        *guard = Some(Registration {
            id: id.clone(),
            outbound: link.outbound,
        });
        Ok(id)
    }

    async fn dial(&self, remote: &EndpointId) -> Result<Arc<dyn TransportHandle>, HandshakeError> {
        let (local, outbound) = self.local().await?;
        let negotiator = self.connector.negotiator().await?;
        let events = negotiator
            .events()
            .ok_or_else(|| HandshakeError::PeerError("negotiation events already taken".into()))?;

        let (open_tx, open_rx) = oneshot::channel();
        if let Ok(mut routes) = self.routes.lock() {
            if let Some(previous) = routes.negotiators.insert(remote.clone(), negotiator.clone()) {
                tokio::spawn(async move { previous.close().await });
            }
            routes.pending_dials.insert(remote.clone(), open_tx);
        }

        let offer = match negotiator.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                Self::take_pending(&self.routes, remote);
                return Err(e);
            }
        };
        let sent = outbound.send(RelayMessage::Signal {
            from: local.clone(),
            to: remote.clone(),
            signal: SignalPayload::Offer { description: offer },
        });
        if sent.is_err() {
            Self::take_pending(&self.routes, remote);
            return Err(HandshakeError::PeerError("relay connection closed".into()));
        }
        debug!(event = "relay_dial", remote = %remote, "Offer sent through relay");

        spawn_trickle(
            local,
            remote.clone(),
            outbound,
            events,
            self.routes.clone(),
            None,
        );

        let outcome = tokio::time::timeout(self.dial_timeout, open_rx).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HandshakeError::PeerError("dial abandoned".into())),
            Err(_) => Err(HandshakeError::PeerError(format!("timed out connecting to {remote}"))),
        };
        if let Ok(mut routes) = self.routes.lock() {
            routes.pending_dials.remove(remote);
            if result.is_err()
                && let Some(negotiator) = routes.negotiators.remove(remote)
            {
                tokio::spawn(async move { negotiator.close().await });
            }
        }
        result
    }

    fn incoming(&self) -> Option<mpsc::UnboundedReceiver<IncomingConnection>> {
        self.incoming_rx.lock().ok()?.take()
    }
}

/// Forward local negotiation events for one remote through the relay, and
/// resolve the dial (or report the inbound channel) when it opens.
fn spawn_trickle(
    local: EndpointId,
    remote: EndpointId,
    outbound: mpsc::UnboundedSender<RelayMessage>,
    mut events: mpsc::UnboundedReceiver<NegotiationEvent>,
    routes: Arc<Mutex<Routes>>,
    incoming: Option<mpsc::UnboundedSender<IncomingConnection>>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let signal = match event {
                NegotiationEvent::Candidate(candidate) => SignalPayload::Candidate { candidate },
                NegotiationEvent::GatheringComplete => SignalPayload::EndOfCandidates,
                NegotiationEvent::ChannelOpen(handle) => {
                    if let Ok(mut routes) = routes.lock() {
                        routes.negotiators.remove(&remote);
                    }
                    match &incoming {
                        Some(incoming) => {
                            info!(event = "relay_incoming_open", remote = %remote, "Inbound channel open");
                            let _ = incoming.send((remote.clone(), handle));
                        }
                        None => {
                            if let Some(tx) = RelayDiscovery::take_pending(&routes, &remote) {
                                let _ = tx.send(Ok(handle));
                            }
                        }
                    }
                    continue;
                }
                NegotiationEvent::Failed(detail) => {
                    warn!(event = "relay_negotiation_failed", remote = %remote, %detail, "Negotiation failed");
                    if let Some(tx) = RelayDiscovery::take_pending(&routes, &remote) {
                        let _ = tx.send(Err(HandshakeError::PeerError(detail)));
                    }
                    continue;
                }
            };
            let message = RelayMessage::Signal {
                from: local.clone(),
                to: remote.clone(),
                signal,
            };
            if outbound.send(message).is_err() {
                break;
            }
        }
    });
}

struct Router {
    local: EndpointId,
    outbound: mpsc::UnboundedSender<RelayMessage>,
    connector: Arc<dyn Connector>,
    routes: Arc<Mutex<Routes>>,
    incoming: mpsc::UnboundedSender<IncomingConnection>,
}

impl Router {
    async fn handle(&self, message: RelayMessage) {
        match message {
            RelayMessage::Signal { from, signal, .. } => self.on_signal(from, signal).await,
            RelayMessage::Error {
                reason,
                peer: Some(peer),
            } => {
                warn!(event = "relay_error", remote = %peer, %reason, "Relay could not route to peer");
                self.fail_dial(&peer, &reason);
            }
            RelayMessage::Error { reason, peer: None } => {
                warn!(event = "relay_error", %reason, "Relay reported an error");
            }
            RelayMessage::Welcome { .. } | RelayMessage::Hello { .. } => {}
        }
    }

    async fn on_signal(&self, from: EndpointId, signal: SignalPayload) {
        match signal {
            SignalPayload::Offer { description } => {
                if let Err(e) = self.answer(&from, &description).await {
                    warn!(event = "relay_answer_failure", remote = %from, error = %e, "Could not answer offer");
                }
            }
            SignalPayload::Answer { description } => {
                let Some(negotiator) = RelayDiscovery::negotiator_for(&self.routes, &from) else {
                    debug!(event = "relay_stray_answer", remote = %from, "Answer for no pending dial");
                    return;
                };
                if let Err(e) = negotiator.apply_answer(&description).await
                    && let Some(tx) = RelayDiscovery::take_pending(&self.routes, &from)
                {
                    let _ = tx.send(Err(e));
                }
            }
            SignalPayload::Candidate { candidate } => {
                if let Some(negotiator) = RelayDiscovery::negotiator_for(&self.routes, &from)
                    && let Err(e) = negotiator.add_candidate(&candidate).await
                {
                    warn!(event = "candidate_rejected", remote = %from, error = %e, "Failed to add remote route candidate");
                }
            }
            SignalPayload::EndOfCandidates => {
                debug!(event = "relay_end_of_candidates", remote = %from);
            }
        }
    }

    async fn answer(
        &self,
        from: &EndpointId,
        offer: &crate::core::connection::negotiator::SessionDescription,
    ) -> Result<(), HandshakeError> {
        let negotiator = self.connector.negotiator().await?;
        let events = negotiator
            .events()
            .ok_or_else(|| HandshakeError::PeerError("negotiation events already taken".into()))?;
        if let Ok(mut routes) = self.routes.lock()
            && let Some(previous) = routes.negotiators.insert(from.clone(), negotiator.clone())
        {
            tokio::spawn(async move { previous.close().await });
        }

        let answer = negotiator.accept_offer(offer).await?;
        self.outbound
            .send(RelayMessage::Signal {
                from: self.local.clone(),
                to: from.clone(),
                signal: SignalPayload::Answer { description: answer },
            })
            .map_err(|_| HandshakeError::PeerError("relay connection closed".into()))?;
        info!(event = "relay_answered", remote = %from, "Answered incoming offer");

        spawn_trickle(
            self.local.clone(),
            from.clone(),
            self.outbound.clone(),
            events,
            self.routes.clone(),
            Some(self.incoming.clone()),
        );
        Ok(())
    }

    /// Fail the dial to `remote` only; other dials keep waiting.
    fn fail_dial(&self, remote: &EndpointId, reason: &str) {
        let negotiator = match self.routes.lock() {
            Ok(mut routes) => routes.negotiators.remove(remote),
            Err(_) => return,
        };
        if let Some(negotiator) = negotiator {
            tokio::spawn(async move { negotiator.close().await });
        }
        if let Some(tx) = RelayDiscovery::take_pending(&self.routes, remote) {
            let _ = tx.send(Err(HandshakeError::PeerError(reason.to_string())));
        }
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = match self.routes.lock() {
            Ok(mut routes) => routes.pending_dials.drain().collect(),
            Err(_) => return,
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(HandshakeError::PeerError(reason.to_string())));
        }
    }
}
