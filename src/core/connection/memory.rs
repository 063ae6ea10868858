//! In-process transport and negotiator.
//!
//! [`MemoryTransport::pair`] gives two already-open handles wired to each
//! other. [`MemoryNetwork`] hands out negotiators whose offers and answers
//! are plain strings naming the negotiator; applying an answer opens a
//! transport pair on both sides. Used by tests and by the relay demo mode.

use super::negotiator::{
    Connector, NegotiationEvent, Negotiator, RouteCandidate, SessionDescription,
};
use super::transport::{ChannelStatus, EventSlot, Payload, TransportEvent, TransportHandle};
use crate::core::error::{ConnectionError, HandshakeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

// ── Transport ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct LinkState {
    open: AtomicBool,
}

/// One end of an in-process, ordered, reliable channel.
pub struct MemoryTransport {
    link: Arc<LinkState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events: EventSlot,
    peer_tx: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<Payload>>,
}

impl MemoryTransport {
    /// Two connected, open ends. Each end already has `Open` queued.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let link = Arc::new(LinkState {
            open: AtomicBool::new(true),
        });
        let (a_tx, a_slot) = EventSlot::new();
        let (b_tx, b_slot) = EventSlot::new();
        let _ = a_tx.send(TransportEvent::Open);
        let _ = b_tx.send(TransportEvent::Open);

        let a = Arc::new(Self {
            link: link.clone(),
            events_tx: a_tx.clone(),
            events: a_slot,
            peer_tx: b_tx.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Self {
            link,
            events_tx: b_tx,
            events: b_slot,
            peer_tx: a_tx,
            sent: Mutex::new(Vec::new()),
        });
        (a, b)
    }

    /// Everything successfully sent from this end, in order.
    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Inject a transport error on this end, as a failing network would.
    pub fn fail(&self, detail: &str) {
        let _ = self.events_tx.send(TransportEvent::Error(detail.to_string()));
    }
}

#[async_trait]
impl TransportHandle for MemoryTransport {
    fn status(&self) -> ChannelStatus {
        if self.link.open.load(Ordering::Acquire) {
            ChannelStatus::Open
        } else {
            ChannelStatus::Closed
        }
    }

    async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        if !self.status().is_open() {
            return Err(ConnectionError::NotOpen);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.clone());
        }
        self.peer_tx
            .send(TransportEvent::Data(payload))
            .map_err(|_| ConnectionError::TransportError("peer dropped".into()))
    }

    async fn close(&self) {
        // Only the first close notifies.
        if self.link.open.swap(false, Ordering::AcqRel) {
            let _ = self.events_tx.send(TransportEvent::Closed);
            let _ = self.peer_tx.send(TransportEvent::Closed);
        }
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

// ── Negotiation ──────────────────────────────────────────────────────────────

const OFFER_PREFIX: &str = "memory-offer:";
const ANSWER_PREFIX: &str = "memory-answer:";

/// Shared switchboard for [`MemoryNegotiator`]s.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    next_id: AtomicU64,
    candidates_per_side: AtomicUsize,
    announce_end: AtomicBool,
    failure: Mutex<Option<String>>,
    negotiators: Mutex<HashMap<u64, Arc<MemoryNegotiator>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let network = Self {
            inner: Arc::new(NetworkInner::default()),
        };
        network.set_candidates(2, true);
        network
    }

    /// How many candidates each side emits and whether it then signals
    /// end-of-candidates.
    pub fn set_candidates(&self, per_side: usize, announce_end: bool) {
        self.inner.candidates_per_side.store(per_side, Ordering::Relaxed);
        self.inner.announce_end.store(announce_end, Ordering::Relaxed);
    }

    /// Make every following offer/answer fail with `detail`.
    pub fn set_failure(&self, detail: Option<&str>) {
        if let Ok(mut failure) = self.inner.failure.lock() {
            *failure = detail.map(str::to_string);
        }
    }

    pub fn negotiator(&self) -> Arc<MemoryNegotiator> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let negotiator = Arc::new(MemoryNegotiator {
            id,
            network: self.clone(),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        });
        if let Ok(mut all) = self.inner.negotiators.lock() {
            all.insert(id, negotiator.clone());
        }
        negotiator
    }

    fn lookup(&self, id: u64) -> Option<Arc<MemoryNegotiator>> {
        self.inner.negotiators.lock().ok()?.get(&id).cloned()
    }

    fn check_failure(&self) -> Result<(), HandshakeError> {
        match self.inner.failure.lock().ok().and_then(|f| f.clone()) {
            Some(detail) => Err(HandshakeError::PeerError(detail)),
            None => Ok(()),
        }
    }
}

/// Builds [`MemoryNegotiator`]s on a shared [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn negotiator(&self) -> Result<Arc<dyn Negotiator>, HandshakeError> {
        Ok(self.network.negotiator())
    }
}

pub struct MemoryNegotiator {
    id: u64,
    network: MemoryNetwork,
    events_tx: mpsc::UnboundedSender<NegotiationEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NegotiationEvent>>>,
    closed: AtomicBool,
}

impl MemoryNegotiator {
    fn emit_candidates(&self) {
        let count = self.network.inner.candidates_per_side.load(Ordering::Relaxed);
        for n in 0..count {
            let candidate = RouteCandidate {
                candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{} {} typ host", self.id, 50000 + n),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            };
            let _ = self.events_tx.send(NegotiationEvent::Candidate(candidate));
        }
        if self.network.inner.announce_end.load(Ordering::Relaxed) {
            let _ = self.events_tx.send(NegotiationEvent::GatheringComplete);
        }
    }

    fn parse_id(sdp: &str, prefix: &str) -> Result<u64, HandshakeError> {
        sdp.strip_prefix(prefix)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| HandshakeError::PeerError(format!("unexpected description: {sdp}")))
    }
}

#[async_trait]
impl Negotiator for MemoryNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, HandshakeError> {
        self.network.check_failure()?;
        self.emit_candidates();
        Ok(SessionDescription::offer(format!("{OFFER_PREFIX}{}", self.id)))
    }

    async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, HandshakeError> {
        self.network.check_failure()?;
        let initiator = Self::parse_id(&offer.sdp, OFFER_PREFIX)?;
        if self.network.lookup(initiator).is_none() {
            return Err(HandshakeError::PeerError("offer refers to an unknown endpoint".into()));
        }
        self.emit_candidates();
        Ok(SessionDescription::answer(format!("{ANSWER_PREFIX}{}", self.id)))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), HandshakeError> {
        let responder_id = Self::parse_id(&answer.sdp, ANSWER_PREFIX)?;
        let responder = self
            .network
            .lookup(responder_id)
            .ok_or_else(|| HandshakeError::PeerError("answer refers to an unknown endpoint".into()))?;
        if self.closed.load(Ordering::Acquire) || responder.closed.load(Ordering::Acquire) {
            return Err(HandshakeError::PeerError("negotiation already closed".into()));
        }

        let (local, remote) = MemoryTransport::pair();
        debug!(event = "memory_link_open", initiator = self.id, responder = responder_id, "In-memory channel opened");
        let _ = self.events_tx.send(NegotiationEvent::ChannelOpen(local));
        let _ = responder.events_tx.send(NegotiationEvent::ChannelOpen(remote));
        Ok(())
    }

    async fn add_candidate(&self, candidate: &RouteCandidate) -> Result<(), HandshakeError> {
        if candidate.candidate.is_empty() {
            return Err(HandshakeError::PeerError("empty candidate".into()));
        }
        Ok(())
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<NegotiationEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut all) = self.network.inner.negotiators.lock() {
            all.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::transport::send_text;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MemoryTransport::pair();
        let mut rx = b.subscribe().unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Open));

        send_text(a.as_ref(), "one".into()).await.unwrap();
        a.send(Payload::Binary(bytes::Bytes::from_static(b"two"))).await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Data(Payload::Text("one".into()))));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Data(Payload::Binary(bytes::Bytes::from_static(b"two"))))
        );
    }

    #[tokio::test]
    async fn test_close_notifies_both_ends_once() {
        let (a, b) = MemoryTransport::pair();
        let mut a_rx = a.subscribe().unwrap();
        let mut b_rx = b.subscribe().unwrap();
        a.close().await;
        b.close().await;

        assert_eq!(a_rx.recv().await, Some(TransportEvent::Open));
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Closed));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Open));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Closed));
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b.status(), ChannelStatus::Closed);
        assert_eq!(
            send_text(b.as_ref(), "late".into()).await,
            Err(ConnectionError::NotOpen)
        );
    }

    #[tokio::test]
    async fn test_offer_answer_opens_both_sides() {
        let network = MemoryNetwork::new();
        let initiator = network.negotiator();
        let responder = network.negotiator();
        let mut i_events = initiator.events().unwrap();
        let mut r_events = responder.events().unwrap();

        let offer = initiator.create_offer().await.unwrap();
        let answer = responder.accept_offer(&offer).await.unwrap();
        initiator.apply_answer(&answer).await.unwrap();

        let mut opened = 0;
        for rx in [&mut i_events, &mut r_events] {
            while let Ok(event) = rx.try_recv() {
                if let NegotiationEvent::ChannelOpen(handle) = event {
                    assert!(handle.status().is_open());
                    opened += 1;
                }
            }
        }
        assert_eq!(opened, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let network = MemoryNetwork::new();
        network.set_failure(Some("no route"));
        let negotiator = network.negotiator();
        assert_eq!(
            negotiator.create_offer().await,
            Err(HandshakeError::PeerError("no route".into()))
        );
    }
}
