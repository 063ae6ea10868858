//! Everything that reaches the session owner task.
//!
//! Handshake steps, discovery results, channel notifications and send-loop
//! reports all arrive on one unbounded channel and are applied in order.
//! `attempt` tags handshake work so results of a superseded attempt can be
//! dropped; `serial` does the same for registry entries that were replaced.

use crate::core::connection::negotiator::NegotiationEvent;
use crate::core::connection::transport::{TransportEvent, TransportHandle};
use crate::core::error::{ConnectionError, HandshakeError};
use crate::core::identity::EndpointId;
use crate::core::transfer::SendOutcome;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub enum SessionEvent {
    /// Gathering settled and the outgoing code is ready (or failed).
    TokenReady {
        attempt: u64,
        result: Result<String, HandshakeError>,
    },
    /// The discovery service confirmed our identity.
    Registered {
        attempt: u64,
        result: Result<EndpointId, HandshakeError>,
    },
    /// Negotiation notification arriving after gathering settled.
    Negotiation { attempt: u64, event: NegotiationEvent },
    /// Outcome of a discovery dial started by `connect`.
    Dialed {
        attempt: u64,
        remote: EndpointId,
        result: Result<Arc<dyn TransportHandle>, HandshakeError>,
    },
    /// Outcome of a dial started by `reconnect`.
    Redialed {
        remote: EndpointId,
        result: Result<Arc<dyn TransportHandle>, HandshakeError>,
    },
    /// A remote endpoint opened a channel to us through discovery.
    Incoming {
        remote: EndpointId,
        handle: Arc<dyn TransportHandle>,
    },
    Transport {
        remote: EndpointId,
        serial: u64,
        event: TransportEvent,
    },
    SendProgress {
        remote: EndpointId,
        serial: u64,
        offset: u64,
    },
    SendFinished {
        remote: EndpointId,
        serial: u64,
        result: Result<SendOutcome, ConnectionError>,
    },
}

impl Debug for SessionEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenReady { attempt, result } => f
                .debug_struct("TokenReady")
                .field("attempt", attempt)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Registered { attempt, result } => f
                .debug_struct("Registered")
                .field("attempt", attempt)
                .field("result", result)
                .finish(),
            Self::Negotiation { attempt, event } => f
                .debug_struct("Negotiation")
                .field("attempt", attempt)
                .field("event", event)
                .finish(),
            Self::Dialed { attempt, remote, result } => f
                .debug_struct("Dialed")
                .field("attempt", attempt)
                .field("remote", remote)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Redialed { remote, result } => f
                .debug_struct("Redialed")
                .field("remote", remote)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Incoming { remote, .. } => f.debug_struct("Incoming").field("remote", remote).finish(),
            Self::Transport { remote, serial, event } => f
                .debug_struct("Transport")
                .field("remote", remote)
                .field("serial", serial)
                .field("event", event)
                .finish(),
            Self::SendProgress { remote, serial, offset } => f
                .debug_struct("SendProgress")
                .field("remote", remote)
                .field("serial", serial)
                .field("offset", offset)
                .finish(),
            Self::SendFinished { remote, serial, result } => f
                .debug_struct("SendFinished")
                .field("remote", remote)
                .field("serial", serial)
                .field("result", result)
                .finish(),
        }
    }
}
