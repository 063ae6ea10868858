//! WebRTC-backed negotiator and transport.
//!
//! One peer connection per negotiator, one ordered data channel per peer
//! connection. The initiator creates the channel before its offer; the
//! responder adopts it through `on_data_channel`. Route candidates trickle
//! out of `on_ice_candidate` as [`NegotiationEvent::Candidate`], with a
//! final [`NegotiationEvent::GatheringComplete`].

mod channel;
mod initializer;

pub use channel::WebRtcTransport;
pub use initializer::IceServer;

use self::channel::ChannelSlot;
use self::initializer::{
    create_webrtc_api, from_rtc_description, peer_error, rtc_configuration, to_rtc_description,
};
use super::negotiator::{
    Connector, DescriptionKind, NegotiationEvent, Negotiator, RouteCandidate, SessionDescription,
};
use crate::core::config::DATA_CHANNEL_LABEL;
use crate::core::error::HandshakeError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Builds a fresh [`WebRtcNegotiator`] per connection attempt.
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<IceServer>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self { ice_servers }
    }
}

impl Default for WebRtcConnector {
    fn default() -> Self {
        Self::new(IceServer::default_servers())
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn negotiator(&self) -> Result<Arc<dyn Negotiator>, HandshakeError> {
        Ok(WebRtcNegotiator::new(&self.ice_servers).await?)
    }
}

pub struct WebRtcNegotiator {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
    events_tx: mpsc::UnboundedSender<NegotiationEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NegotiationEvent>>>,
}

impl WebRtcNegotiator {
    pub async fn new(ice_servers: &[IceServer]) -> Result<Arc<Self>, HandshakeError> {
        let api = create_webrtc_api()?;
        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(ice_servers))
                .await
                .map_err(|e| peer_error("peer connection setup failed", e))?,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel: ChannelSlot = Arc::new(Mutex::new(None));

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => {
                            let _ = tx.send(NegotiationEvent::Candidate(init.into()));
                        }
                        Err(e) => warn!(event = "ice_candidate_encode_failure", error = %e, "Dropping local candidate"),
                    },
                    None => {
                        let _ = tx.send(NegotiationEvent::GatheringComplete);
                    }
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        info!(event = "webrtc_connected", "WebRTC connection established");
                    }
                    RTCPeerConnectionState::Failed => {
                        error!(event = "webrtc_failed", "WebRTC connection failed");
                        let _ = tx.send(NegotiationEvent::Failed("no route to peer could be negotiated".into()));
                    }
                    RTCPeerConnectionState::Disconnected => {
                        warn!(event = "webrtc_disconnected", "WebRTC transient disconnect (ICE may recover)");
                    }
                    RTCPeerConnectionState::Closed => {
                        info!(event = "webrtc_closed", "WebRTC connection closed");
                    }
                    _ => {}
                }
            })
        }));

        // Responder side: adopt the channel the initiator created.
        let weak_pc = Arc::downgrade(&pc);
        let weak_slot = Arc::downgrade(&channel);
        let tx = events_tx.clone();
        pc.on_data_channel(Box::new(move |dc| {
            let weak_pc = weak_pc.clone();
            let weak_slot = weak_slot.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let (Some(pc), Some(slot)) = (weak_pc.upgrade(), weak_slot.upgrade()) else {
                    return;
                };
                info!(event = "dc_received", label = %dc.label(), "Remote data channel announced");
                WebRtcTransport::attach(pc, dc, &slot, tx);
            })
        }));

        Ok(Arc::new(Self {
            pc,
            channel,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, HandshakeError> {
        // Explicit ordered + fully reliable (SCTP default, no partial reliability).
        let dc_init = Some(RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        });
        let dc = self
            .pc
            .create_data_channel(DATA_CHANNEL_LABEL, dc_init)
            .await
            .map_err(|e| peer_error("data channel setup failed", e))?;
        WebRtcTransport::attach(self.pc.clone(), dc, &self.channel, self.events_tx.clone());

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| peer_error("offer creation failed", e))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| peer_error("local offer rejected", e))?;
        Ok(from_rtc_description(&offer, DescriptionKind::Offer))
    }

    async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, HandshakeError> {
        if offer.kind != DescriptionKind::Offer {
            return Err(HandshakeError::PeerError("expected an offer".into()));
        }
        self.pc
            .set_remote_description(to_rtc_description(offer)?)
            .await
            .map_err(|e| peer_error("remote offer rejected", e))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| peer_error("answer creation failed", e))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| peer_error("local answer rejected", e))?;
        Ok(from_rtc_description(&answer, DescriptionKind::Answer))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), HandshakeError> {
        if answer.kind != DescriptionKind::Answer {
            return Err(HandshakeError::PeerError("expected an answer".into()));
        }
        self.pc
            .set_remote_description(to_rtc_description(answer)?)
            .await
            .map_err(|e| peer_error("remote answer rejected", e))
    }

    async fn add_candidate(&self, candidate: &RouteCandidate) -> Result<(), HandshakeError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit::from(candidate))
            .await
            .map_err(|e| peer_error("route candidate rejected", e))
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<NegotiationEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    async fn close(&self) {
        if let Ok(mut held) = self.channel.lock() {
            held.take();
        }
        if let Err(e) = self.pc.close().await {
            warn!(event = "pc_close_failure", error = %e, "Peer connection close failed");
        }
    }
}
