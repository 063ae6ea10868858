use super::frame::{self, Frame};
use super::state::{Accumulated, ReceivedFile, TransferState};
use crate::core::connection::transport::Payload;
use tracing::{debug, info, warn};

/// What one inbound payload did to the transfer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Message(String),
    Announced { name: String, size: u64 },
    Progress(u8),
    Completed(ReceivedFile),
    /// The remote refused; the caller surfaces the reason and closes.
    Rejected(String),
    Ignored,
}

/// Apply one inbound payload to `state`.
pub fn apply_inbound(state: &mut TransferState, payload: Payload) -> InboundOutcome {
    match payload {
        Payload::Text(raw) => match frame::decode(&raw) {
            Frame::Text(text) => {
                state.record_inbound(text.clone());
                InboundOutcome::Message(text)
            }
            Frame::Announce(announcement) => {
                debug!(
                    event = "transfer_announced",
                    file = %announcement.name,
                    size = announcement.size,
                    "Incoming file announced"
                );
                match state.announce(&announcement.name, announcement.size, &announcement.mime) {
                    Some(file) => completed(file),
                    None => InboundOutcome::Announced {
                        name: announcement.name,
                        size: announcement.size,
                    },
                }
            }
            Frame::Reject { reason } => {
                warn!(event = "transfer_rejected", %reason, "Remote rejected the connection");
                InboundOutcome::Rejected(reason)
            }
            Frame::WholeFile(whole) => {
                let file = ReceivedFile {
                    name: whole.filename,
                    mime: whole.filetype,
                    data: whole.file,
                };
                state.receive_whole(&file);
                completed(file)
            }
        },
        Payload::Binary(fragment) => match state.accumulate(fragment) {
            Accumulated::Progress(progress) => InboundOutcome::Progress(progress),
            Accumulated::Completed(file) => completed(file),
            Accumulated::Unexpected => {
                warn!(event = "transfer_unexpected_binary", "Binary data without an announcement, discarded");
                InboundOutcome::Ignored
            }
        },
    }
}

fn completed(file: ReceivedFile) -> InboundOutcome {
    info!(event = "transfer_receive_complete", file = %file.name, size = file.size(), "File received");
    InboundOutcome::Completed(file)
}
