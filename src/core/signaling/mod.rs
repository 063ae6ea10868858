pub mod discovery;
pub mod memory;
pub mod relay;

pub use discovery::{Discovery, IncomingConnection, RelayDiscovery};
pub use memory::MemoryRelay;
pub use relay::{RelayLink, RelayMessage, SignalPayload, SignalingPipe, WsPipe};
