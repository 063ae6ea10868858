//! Relay wire protocol and the duplex pipe that carries it.
//!
//! Frames are JSON text, one message per frame:
//!
//! ```text
//! {"type":"hello","id":"..."}                       client -> relay
//! {"type":"welcome","id":"..."}                     relay  -> client
//! {"type":"signal","from":"a","to":"b","signal":{...}}  both ways
//! {"type":"error","reason":"...","peer":"b"}        relay  -> client
//! ```

use crate::core::connection::negotiator::{RouteCandidate, SessionDescription};
use crate::core::error::HandshakeError;
use crate::core::identity::EndpointId;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Register with the relay, optionally asking for a specific id.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<EndpointId>,
    },
    /// The id the relay routes to this client.
    Welcome { id: EndpointId },
    Signal {
        from: EndpointId,
        to: EndpointId,
        signal: SignalPayload,
    },
    /// `peer` names the destination a failed `signal` was meant for.
    Error {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<EndpointId>,
    },
}

/// Negotiation material routed between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { description: SessionDescription },
    Answer { description: SessionDescription },
    Candidate { candidate: RouteCandidate },
    EndOfCandidates,
}

/// One live connection to the relay: an outbound sender and inbound stream.
///
/// Dropping the link (or every clone of its sender) closes the connection.
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<RelayMessage>,
    pub inbound: mpsc::UnboundedReceiver<RelayMessage>,
}

impl RelayLink {
    pub fn send(&self, msg: RelayMessage) -> Result<(), HandshakeError> {
        self.outbound
            .send(msg)
            .map_err(|_| HandshakeError::PeerError("relay connection closed".into()))
    }

    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.inbound.recv().await
    }
}

/// Something that can open a [`RelayLink`].
#[async_trait]
pub trait SignalingPipe: Send + Sync {
    async fn connect(&self) -> Result<RelayLink, HandshakeError>;
}

/// Relay reached over a WebSocket.
#[derive(Debug, Clone)]
pub struct WsPipe {
    url: url::Url,
}

impl WsPipe {
    pub fn new(url: url::Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl SignalingPipe for WsPipe {
    async fn connect(&self) -> Result<RelayLink, HandshakeError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| HandshakeError::PeerError(format!("relay unreachable: {e}")))?;
        debug!(event = "relay_connected", url = %self.url, "Signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RelayMessage>();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&message) else {
                    continue;
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(event = "relay_socket_error", error = %e, "Signaling websocket error");
                        break;
                    }
                };
                trace!(event = "relay_in", len = text.len());
                match serde_json::from_str::<RelayMessage>(&text) {
                    Ok(message) => {
                        if in_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(event = "relay_frame_invalid", error = %e, "Ignoring malformed relay frame"),
                }
            }
            debug!(event = "relay_disconnected", "Signaling websocket closed");
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
