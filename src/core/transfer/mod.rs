//! Transfer protocol on an open channel: framing, chunked send, reassembly.

pub mod frame;
pub mod receiver;
pub mod sender;
pub mod source;
pub mod state;

pub use receiver::{InboundOutcome, apply_inbound};
pub use sender::{SendOutcome, send_chunked, send_whole};
pub use source::FileSource;
pub use state::{ChatLine, Direction, ReceivedFile, ReceivedSummary, TransferState};

/// Wire shape used for files on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireShape {
    /// Announcement plus binary slices.
    #[default]
    Chunked,
    /// One base64 text frame per file.
    WholeFile,
}
