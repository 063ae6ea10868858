//! [`TransportHandle`] over one ordered, reliable WebRTC data channel.

use super::super::negotiator::NegotiationEvent;
use super::super::transport::{ChannelStatus, EventSlot, Payload, TransportEvent, TransportHandle};
use crate::core::config::{DC_BUFFERED_AMOUNT_HIGH, DC_BUFFER_DRAIN_TIMEOUT, DC_BUFFER_POLL_INTERVAL};
use crate::core::error::ConnectionError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::peer_connection::RTCPeerConnection;

/// Holder for the channel while the negotiator still owns the connection.
pub(super) type ChannelSlot = Arc<Mutex<Option<Arc<WebRtcTransport>>>>;

pub struct WebRtcTransport {
    // Keeps the peer connection alive for as long as the channel is used.
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    events: EventSlot,
}

impl WebRtcTransport {
    /// Wrap `dc`, wiring its callbacks into a fresh event stream. When the
    /// channel opens the handle is announced on `negotiation`.
    pub(super) fn attach(
        pc: Arc<RTCPeerConnection>,
        dc: Arc<RTCDataChannel>,
        slot: &ChannelSlot,
        negotiation: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> Arc<Self> {
        let (tx, events) = EventSlot::new();
        let transport = Arc::new(Self {
            pc,
            dc: dc.clone(),
            events,
        });
        if let Ok(mut held) = slot.lock() {
            *held = Some(transport.clone());
        }

        let weak = Arc::downgrade(&transport);
        let open_tx = tx.clone();
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            let tx = open_tx.clone();
            let negotiation = negotiation.clone();
            Box::pin(async move {
                info!(event = "dc_open", "Data channel open");
                let _ = tx.send(TransportEvent::Open);
                if let Some(transport) = weak.upgrade() {
                    let _ = negotiation.send(NegotiationEvent::ChannelOpen(transport));
                }
            })
        }));

        let close_tx = tx.clone();
        dc.on_close(Box::new(move || {
            let tx = close_tx.clone();
            Box::pin(async move {
                warn!(event = "dc_closed", "Data channel closed by transport");
                let _ = tx.send(TransportEvent::Closed);
            })
        }));

        let error_tx = tx.clone();
        dc.on_error(Box::new(move |err| {
            let tx = error_tx.clone();
            Box::pin(async move {
                warn!(event = "dc_error", %err, "Data channel transport error");
                let _ = tx.send(TransportEvent::Error(err.to_string()));
            })
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    Payload::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    Payload::Binary(msg.data)
                };
                let _ = tx.send(TransportEvent::Data(payload));
            })
        }));

        transport
    }

    /// Poll until the send buffer has room for `next` bytes, or time out.
    async fn wait_for_buffer_space(&self, next: usize) -> Result<(), ConnectionError> {
        let buffered = self.dc.buffered_amount().await;
        if buffered + next <= DC_BUFFERED_AMOUNT_HIGH {
            return Ok(());
        }
        debug!(
            event = "dc_backpressure",
            buffered,
            high_watermark = DC_BUFFERED_AMOUNT_HIGH,
            "Waiting for send buffer to drain"
        );
        let deadline = tokio::time::Instant::now() + DC_BUFFER_DRAIN_TIMEOUT;
        loop {
            if self.dc.ready_state() != RTCDataChannelState::Open {
                return Err(ConnectionError::NotOpen);
            }
            if self.dc.buffered_amount().await + next <= DC_BUFFERED_AMOUNT_HIGH {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(event = "dc_backpressure_timeout", "Send buffer drain timeout, proceeding anyway");
                return Ok(());
            }
            tokio::time::sleep(DC_BUFFER_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl TransportHandle for WebRtcTransport {
    fn status(&self) -> ChannelStatus {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelStatus::Open,
            RTCDataChannelState::Closing => ChannelStatus::Closing,
            RTCDataChannelState::Closed => ChannelStatus::Closed,
            _ => ChannelStatus::Connecting,
        }
    }

    async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        if !self.status().is_open() {
            return Err(ConnectionError::NotOpen);
        }
        self.wait_for_buffer_space(payload.len()).await?;
        let sent = match payload {
            Payload::Text(text) => self.dc.send_text(text).await,
            Payload::Binary(data) => self.dc.send(&data).await,
        };
        sent.map(|_| ()).map_err(|e| ConnectionError::TransportError(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(event = "dc_close_failure", error = %e, "Data channel close failed");
        }
        if let Err(e) = self.pc.close().await {
            debug!(event = "pc_close_failure", error = %e, "Peer connection close failed");
        }
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}
