//! Per-entry transfer state with explicit transitions.

use crate::core::error::TransferError;
use bytes::{Bytes, BytesMut};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub direction: Direction,
    pub text: String,
}

impl ChatLine {
    /// Display form, marking the direction.
    pub fn display(&self) -> String {
        match self.direction {
            Direction::Inbound => format!("Received: {}", self.text),
            Direction::Outbound => format!("Sent: {}", self.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl ReceivedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn summary(&self) -> ReceivedSummary {
        ReceivedSummary {
            name: self.name.clone(),
            mime: self.mime.clone(),
            size: self.data.len() as u64,
        }
    }
}

/// What is kept about a delivered file; its bytes leave with the
/// completion outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSummary {
    pub name: String,
    pub mime: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outgoing {
    #[default]
    Idle,
    Sending {
        name: String,
        size: u64,
        offset: u64,
        progress: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Incoming {
    #[default]
    Idle,
    Receiving {
        name: String,
        size: u64,
        mime: String,
        received: u64,
        progress: u8,
        fragments: Vec<Bytes>,
    },
}

/// Result of feeding one binary fragment into the incoming side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulated {
    /// No announcement in force; the fragment was dropped.
    Unexpected,
    Progress(u8),
    Completed(ReceivedFile),
}

#[derive(Debug, Clone, Default)]
pub struct TransferState {
    outgoing: Outgoing,
    incoming: Incoming,
    /// Progress of the last finished send; stays at 100 until the next one.
    last_send_progress: u8,
    last_receive_progress: u8,
    log: Vec<ChatLine>,
    received: Vec<ReceivedSummary>,
}

/// `min(100, round(done / total * 100))`, with an empty total counting as done.
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

impl TransferState {
    pub fn is_sending(&self) -> bool {
        matches!(self.outgoing, Outgoing::Sending { .. })
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.incoming, Incoming::Receiving { .. })
    }

    pub fn send_progress(&self) -> u8 {
        match &self.outgoing {
            Outgoing::Sending { progress, .. } => *progress,
            Outgoing::Idle => self.last_send_progress,
        }
    }

    pub fn receive_progress(&self) -> u8 {
        match &self.incoming {
            Incoming::Receiving { progress, .. } => *progress,
            Incoming::Idle => self.last_receive_progress,
        }
    }

    pub fn messages(&self) -> &[ChatLine] {
        &self.log
    }

    pub fn received_files(&self) -> &[ReceivedSummary] {
        &self.received
    }

    // ── Outgoing ─────────────────────────────────────────────────────────────

    pub fn begin_send(&mut self, name: &str, size: u64) -> Result<(), TransferError> {
        if self.is_sending() {
            return Err(TransferError::TransferAlreadyInProgress);
        }
        self.outgoing = Outgoing::Sending {
            name: name.to_string(),
            size,
            offset: 0,
            progress: 0,
        };
        Ok(())
    }

    /// Record loop progress. Progress never moves backwards.
    pub fn advance(&mut self, new_offset: u64) {
        if let Outgoing::Sending {
            size,
            offset,
            progress,
            ..
        } = &mut self.outgoing
        {
            *offset = (*offset).max(new_offset.min(*size));
            *progress = (*progress).max(progress_percent(*offset, *size));
        }
    }

    pub fn finish_send(&mut self) {
        self.outgoing = Outgoing::Idle;
        self.last_send_progress = 100;
    }

    pub fn abort_send(&mut self) {
        if self.is_sending() {
            self.outgoing = Outgoing::Idle;
        }
    }

    // ── Incoming ─────────────────────────────────────────────────────────────

    /// Start a new incoming transfer, dropping any partial one. A zero-size
    /// announcement completes immediately.
    pub fn announce(&mut self, name: &str, size: u64, mime: &str) -> Option<ReceivedFile> {
        if let Incoming::Receiving {
            name: previous,
            received,
            ..
        } = &self.incoming
        {
            warn!(
                event = "transfer_superseded",
                file = %previous,
                received = *received,
                "New announcement replaces an unfinished incoming file"
            );
        }
        self.incoming = Incoming::Receiving {
            name: name.to_string(),
            size,
            mime: mime.to_string(),
            received: 0,
            progress: 0,
            fragments: Vec::new(),
        };
        if size == 0 {
            return self.complete();
        }
        None
    }

    pub fn accumulate(&mut self, fragment: Bytes) -> Accumulated {
        let Incoming::Receiving {
            size,
            received,
            progress,
            fragments,
            ..
        } = &mut self.incoming
        else {
            return Accumulated::Unexpected;
        };
        *received += fragment.len() as u64;
        fragments.push(fragment);
        *progress = progress_percent(*received, *size);
        if *received >= *size {
            return match self.complete() {
                Some(file) => Accumulated::Completed(file),
                None => Accumulated::Unexpected,
            };
        }
        Accumulated::Progress(*progress)
    }

    /// Publish the file assembled since the announcement and go idle.
    pub fn complete(&mut self) -> Option<ReceivedFile> {
        let Incoming::Receiving {
            name,
            mime,
            fragments,
            ..
        } = std::mem::take(&mut self.incoming)
        else {
            return None;
        };
        let total: usize = fragments.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for fragment in &fragments {
            data.extend_from_slice(fragment);
        }
        let file = ReceivedFile {
            name,
            mime,
            data: data.freeze(),
        };
        self.last_receive_progress = 100;
        self.received.push(file.summary());
        Some(file)
    }

    /// Store a file that arrived in one piece.
    pub fn receive_whole(&mut self, file: &ReceivedFile) {
        self.incoming = Incoming::Idle;
        self.last_receive_progress = 100;
        self.received.push(file.summary());
    }

    /// Drop all incoming accounting.
    pub fn reset(&mut self) {
        self.incoming = Incoming::Idle;
        self.last_receive_progress = 0;
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub fn record_inbound(&mut self, text: String) {
        self.log.push(ChatLine {
            direction: Direction::Inbound,
            text,
        });
    }

    pub fn record_outbound(&mut self, text: String) {
        self.log.push(ChatLine {
            direction: Direction::Outbound,
            text,
        });
    }
}
