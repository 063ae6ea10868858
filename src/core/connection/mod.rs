pub mod memory;
pub mod negotiator;
pub mod ticket;
pub mod transport;
pub mod webrtc;

pub use negotiator::{Connector, NegotiationEvent, Negotiator, RouteCandidate, SessionDescription};
pub use ticket::Ticket;
pub use transport::{ChannelStatus, Payload, TransportEvent, TransportHandle};
