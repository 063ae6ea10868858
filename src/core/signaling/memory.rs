//! In-process relay hub speaking the relay wire protocol.

use super::relay::{RelayLink, RelayMessage, SignalingPipe};
use crate::core::error::HandshakeError;
use crate::core::identity::EndpointId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Routes `signal` messages between every client connected to it.
///
/// Clients get the id they ask for in `hello` unless it is taken or an id
/// was queued with [`MemoryRelay::assign_next`].
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<EndpointId, mpsc::UnboundedSender<RelayMessage>>,
    assigned: VecDeque<EndpointId>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the id handed to the next client that says `hello`.
    pub fn assign_next(&self, id: impl Into<EndpointId>) {
        if let Ok(mut hub) = self.inner.lock() {
            hub.assigned.push_back(id.into());
        }
    }

    fn welcome(&self, requested: Option<EndpointId>, tx: &mpsc::UnboundedSender<RelayMessage>) -> Option<EndpointId> {
        let mut hub = self.inner.lock().ok()?;
        let id = match hub.assigned.pop_front() {
            Some(id) => id,
            None => match requested {
                Some(id) if !hub.clients.contains_key(&id) => id,
                _ => EndpointId::generate(),
            },
        };
        hub.clients.insert(id.clone(), tx.clone());
        Some(id)
    }

    fn route(&self, to: &EndpointId) -> Option<mpsc::UnboundedSender<RelayMessage>> {
        self.inner.lock().ok()?.clients.get(to).cloned()
    }

    fn drop_client(&self, id: &EndpointId) {
        if let Ok(mut hub) = self.inner.lock() {
            hub.clients.remove(id);
        }
    }
}

#[async_trait]
impl SignalingPipe for MemoryRelay {
    async fn connect(&self) -> Result<RelayLink, HandshakeError> {
        let (client_tx, mut hub_rx) = mpsc::unbounded_channel::<RelayMessage>();
        let (hub_tx, client_rx) = mpsc::unbounded_channel::<RelayMessage>();
        let hub = self.clone();

        tokio::spawn(async move {
            let mut me: Option<EndpointId> = None;
            while let Some(message) = hub_rx.recv().await {
                match message {
                    RelayMessage::Hello { id } => {
                        if let Some(old) = me.take() {
                            hub.drop_client(&old);
                        }
                        if let Some(id) = hub.welcome(id, &hub_tx) {
                            debug!(event = "relay_hello", id = %id, "Client registered with relay");
                            let _ = hub_tx.send(RelayMessage::Welcome { id: id.clone() });
                            me = Some(id);
                        }
                    }
                    RelayMessage::Signal { from, to, signal } => {
                        let Some(sender) = me.clone() else {
                            let _ = hub_tx.send(RelayMessage::Error {
                                reason: "say hello first".into(),
                                peer: None,
                            });
                            continue;
                        };
                        if from != sender {
                            let _ = hub_tx.send(RelayMessage::Error {
                                reason: "sender id mismatch".into(),
                                peer: None,
                            });
                            continue;
                        }
                        match hub.route(&to) {
                            Some(target) => {
                                let _ = target.send(RelayMessage::Signal { from, to, signal });
                            }
                            None => {
                                let _ = hub_tx.send(RelayMessage::Error {
                                    reason: format!("unknown peer {to}"),
                                    peer: Some(to),
                                });
                            }
                        }
                    }
                    RelayMessage::Welcome { .. } | RelayMessage::Error { .. } => {}
                }
            }
            if let Some(id) = me {
                hub.drop_client(&id);
            }
        });

        Ok(RelayLink {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signaling::relay::SignalPayload;

    #[tokio::test]
    async fn test_assigned_id_and_routing() {
        let relay = MemoryRelay::new();
        relay.assign_next("abc-123");

        let mut a = relay.connect().await.unwrap();
        a.send(RelayMessage::Hello { id: None }).unwrap();
        assert_eq!(a.recv().await, Some(RelayMessage::Welcome { id: "abc-123".into() }));

        let mut b = relay.connect().await.unwrap();
        b.send(RelayMessage::Hello { id: Some("def-456".into()) }).unwrap();
        assert_eq!(b.recv().await, Some(RelayMessage::Welcome { id: "def-456".into() }));

        let signal = RelayMessage::Signal {
            from: "def-456".into(),
            to: "abc-123".into(),
            signal: SignalPayload::EndOfCandidates,
        };
        b.send(signal.clone()).unwrap();
        assert_eq!(a.recv().await, Some(signal));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_reported() {
        let relay = MemoryRelay::new();
        let mut a = relay.connect().await.unwrap();
        a.send(RelayMessage::Hello { id: Some("a".into()) }).unwrap();
        a.recv().await.unwrap();
        a.send(RelayMessage::Signal {
            from: "a".into(),
            to: "nobody".into(),
            signal: SignalPayload::EndOfCandidates,
        })
        .unwrap();
        assert_eq!(
            a.recv().await,
            Some(RelayMessage::Error {
                reason: "unknown peer nobody".into(),
                peer: Some("nobody".into())
            })
        );
    }
}
