pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handshake;
pub mod identity;
pub mod link;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod storage;
pub mod transfer;

pub use error::SessionError;
pub use session::{Notice, Session, SessionConfig, SessionSnapshot};
