//! Outgoing file transfer on an open handle.
//!
//! Chunked mode sends one announcement, then the body as binary slices of
//! [`CHUNK_SIZE`] in increasing offset order. Whole-file mode sends a single
//! base64 text frame. Send loops own nothing but the handle; they report the
//! offset after every slice through `report` and check the stop signal once
//! per yield.

use super::frame::{self, FileAnnouncement, WholeFile};
use super::source::FileSource;
use crate::core::config::CHUNK_SIZE;
use crate::core::connection::transport::{Payload, TransportHandle, send_text};
use crate::core::error::ConnectionError;
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Cancelled,
}

/// Stream `file` over `handle`. `report` receives the byte offset reached
/// after each slice.
pub async fn send_chunked(
    handle: Arc<dyn TransportHandle>,
    file: FileSource,
    stop: SignalOfStop,
    mut report: impl FnMut(u64) + Send,
) -> Result<SendOutcome, ConnectionError> {
    let total = file.size();
    let announcement = FileAnnouncement::new(file.name.clone(), total, file.mime.clone());
    send_text(handle.as_ref(), frame::encode_announcement(&announcement)).await?;
    debug!(event = "transfer_announced", file = %file.name, size = total);

    let mut offset = 0usize;
    while offset < file.data.len() {
        if stop.cancelled() {
            info!(event = "transfer_send_cancelled", file = %file.name, offset, "Send loop stopped");
            return Ok(SendOutcome::Cancelled);
        }
        let end = (offset + CHUNK_SIZE).min(file.data.len());
        handle
            .send(Payload::Binary(file.data.slice(offset..end)))
            .await?;
        offset = end;
        report(offset as u64);
        tokio::task::yield_now().await;
    }

    info!(event = "transfer_send_complete", file = %file.name, size = total, "File sent");
    Ok(SendOutcome::Completed)
}

/// Send `file` as one base64 text frame.
pub async fn send_whole(handle: &dyn TransportHandle, file: &FileSource) -> Result<(), ConnectionError> {
    let whole = WholeFile {
        file: file.data.clone(),
        filename: file.name.clone(),
        filetype: file.mime.clone(),
    };
    send_text(handle, frame::encode_whole_file(&whole)).await?;
    info!(event = "transfer_send_complete", file = %file.name, size = file.size(), mode = "whole", "File sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::memory::MemoryTransport;
    use crate::core::transfer::frame::Frame;
    use crate::core::transfer::state::TransferState;

    fn text_frames(sent: &[Payload]) -> Vec<Frame> {
        sent.iter()
            .filter_map(|p| match p {
                Payload::Text(t) => Some(frame::decode(t)),
                Payload::Binary(_) => None,
            })
            .collect()
    }

    fn binary_sizes(sent: &[Payload]) -> Vec<usize> {
        sent.iter()
            .filter_map(|p| match p {
                Payload::Binary(b) => Some(b.len()),
                Payload::Text(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_forty_kib_goes_out_in_three_slices() {
        let (a, _b) = MemoryTransport::pair();
        let file = FileSource::new("big.bin", vec![7u8; 40 * 1024]);
        let mut state = TransferState::default();
        state.begin_send(&file.name, file.size()).unwrap();

        let mut seen = Vec::new();
        let outcome = send_chunked(a.clone(), file, SignalOfStop::new(), |offset| {
            state.advance(offset);
            seen.push(state.send_progress());
        })
        .await
        .unwrap();
        state.finish_send();

        assert_eq!(outcome, SendOutcome::Completed);
        let sent = a.sent();
        assert_eq!(
            text_frames(&sent),
            vec![Frame::Announce(FileAnnouncement::new(
                "big.bin",
                40 * 1024,
                "application/octet-stream"
            ))]
        );
        assert_eq!(binary_sizes(&sent), vec![16384, 16384, 8192]);
        assert_eq!(seen, vec![40, 80, 100]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(state.send_progress(), 100);
    }

    #[tokio::test]
    async fn test_exactly_one_chunk() {
        let (a, _b) = MemoryTransport::pair();
        let file = FileSource::new("one.bin", vec![1u8; CHUNK_SIZE]);
        let mut reports = Vec::new();
        send_chunked(a.clone(), file, SignalOfStop::new(), |o| reports.push(o))
            .await
            .unwrap();
        assert_eq!(binary_sizes(&a.sent()), vec![CHUNK_SIZE]);
        assert_eq!(reports, vec![CHUNK_SIZE as u64]);
    }

    #[tokio::test]
    async fn test_zero_byte_file_sends_only_the_announcement() {
        let (a, _b) = MemoryTransport::pair();
        let mut reports = Vec::new();
        let outcome = send_chunked(a.clone(), FileSource::new("empty", Vec::new()), SignalOfStop::new(), |o| {
            reports.push(o)
        })
        .await
        .unwrap();
        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(a.sent().len(), 1);
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_slice() {
        let (a, _b) = MemoryTransport::pair();
        let stop = SignalOfStop::new();
        stop.cancel();
        let outcome = send_chunked(a.clone(), FileSource::new("f", vec![0u8; 100]), stop, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled);
        assert!(binary_sizes(&a.sent()).is_empty());
    }

    #[tokio::test]
    async fn test_closed_handle_sends_nothing() {
        let (a, _b) = MemoryTransport::pair();
        a.close().await;
        let err = send_chunked(a.clone(), FileSource::new("f", vec![0u8; 10]), SignalOfStop::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ConnectionError::NotOpen);
        assert!(a.sent().is_empty());
    }

    #[tokio::test]
    async fn test_whole_file_frame() {
        let (a, _b) = MemoryTransport::pair();
        let file = FileSource::new("a.txt", "hello");
        send_whole(a.as_ref(), &file).await.unwrap();
        let frames = text_frames(&a.sent());
        let [Frame::WholeFile(whole)] = frames.as_slice() else {
            panic!("expected one whole-file frame, got {frames:?}");
        };
        assert_eq!(whole.filename, "a.txt");
        assert_eq!(&whole.file[..], b"hello");
    }
}
