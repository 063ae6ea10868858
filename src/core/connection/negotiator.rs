//! Negotiation seam: the local half of a connection being set up.
//!
//! A [`Negotiator`] creates offers/answers, applies what the remote side
//! sent, and reports discovered route candidates and the eventual open
//! channel as [`NegotiationEvent`]s. A [`Connector`] builds negotiators.

use super::transport::TransportHandle;
use crate::core::error::HandshakeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A session description as produced by the local negotiation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered network path option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl RouteCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Notifications emitted while a connection is negotiated.
pub enum NegotiationEvent {
    Candidate(RouteCandidate),
    /// Explicit "no more candidates".
    GatheringComplete,
    ChannelOpen(Arc<dyn TransportHandle>),
    Failed(String),
}

impl Debug for NegotiationEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candidate(c) => f.debug_tuple("Candidate").field(c).finish(),
            Self::GatheringComplete => f.write_str("GatheringComplete"),
            Self::ChannelOpen(_) => f.write_str("ChannelOpen(..)"),
            Self::Failed(detail) => f.debug_tuple("Failed").field(detail).finish(),
        }
    }
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Initiator: create and apply a local offer.
    async fn create_offer(&self) -> Result<SessionDescription, HandshakeError>;

    /// Responder: apply the remote offer, then create and apply an answer.
    async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, HandshakeError>;

    /// Initiator: apply the remote answer.
    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), HandshakeError>;

    async fn add_candidate(&self, candidate: &RouteCandidate) -> Result<(), HandshakeError>;

    /// Take the negotiation event stream. Only the first caller receives it.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<NegotiationEvent>>;

    async fn close(&self);
}

/// Factory for fresh negotiators, one per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn negotiator(&self) -> Result<Arc<dyn Negotiator>, HandshakeError>;
}

/// Apply every candidate, logging (not failing on) individual rejections.
pub async fn apply_candidates(negotiator: &dyn Negotiator, candidates: &[RouteCandidate]) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        match negotiator.add_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => tracing::warn!(
                event = "candidate_rejected",
                candidate = %candidate.candidate,
                error = %e,
                "Failed to add remote route candidate"
            ),
        }
    }
    applied
}
