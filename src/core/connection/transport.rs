//! Transport handle: the capability surface of one point-to-point channel.
//!
//! A handle exposes its lifecycle through [`TransportEvent`]s delivered on
//! an mpsc receiver, and a `send` for text or binary payloads. The receiver
//! is handed out exactly once ([`EventSlot`]); a second subscriber gets
//! `None` instead of a duplicate stream.

use crate::core::error::ConnectionError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One message on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle notifications from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Data(Payload),
    Error(String),
    Closed,
}

/// Readiness of a channel as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ChannelStatus {
    pub fn is_open(self) -> bool {
        self == ChannelStatus::Open
    }
}

/// An abstraction over one open (or opening) point-to-point data channel.
///
/// Delivery is reliable and ordered per handle.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn status(&self) -> ChannelStatus;

    async fn send(&self, payload: Payload) -> Result<(), ConnectionError>;

    async fn close(&self);

    /// Take the event stream. Only the first caller receives it.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Send text, failing fast when the handle is not open.
pub async fn send_text(handle: &dyn TransportHandle, text: String) -> Result<(), ConnectionError> {
    if !handle.status().is_open() {
        return Err(ConnectionError::NotOpen);
    }
    handle.send(Payload::Text(text)).await
}

/// First-registration-wins holder for a handle's event receiver.
#[derive(Debug)]
pub struct EventSlot {
    rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl EventSlot {
    /// Fresh slot plus the sender that feeds it.
    pub fn new() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: Mutex::new(Some(rx)),
            },
        )
    }

    pub fn take(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.rx.lock().ok()?.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_slot_hands_out_once() {
        let (tx, slot) = EventSlot::new();
        let mut rx = slot.take().expect("first subscriber gets the stream");
        assert!(slot.take().is_none());

        tx.send(TransportEvent::Open).unwrap();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Open);
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Payload::Text("abc".into()).len(), 3);
        assert!(Payload::Binary(Bytes::new()).is_empty());
    }
}
