//! WebRTC API construction and conversions between `webrtc` crate types and
//! the codec-level description/candidate types.

use crate::core::config::DEFAULT_STUN_SERVER;
use crate::core::connection::negotiator::{DescriptionKind, RouteCandidate, SessionDescription};
use crate::core::error::HandshakeError;
use serde::{Deserialize, Serialize};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// One STUN/TURN server entry, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    pub fn default_servers() -> Vec<Self> {
        vec![Self::stun(DEFAULT_STUN_SERVER)]
    }
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
        }
    }
}

pub(crate) fn peer_error(context: &str, err: impl std::fmt::Display) -> HandshakeError {
    HandshakeError::PeerError(format!("{context}: {err}"))
}

pub(crate) fn create_webrtc_api() -> Result<webrtc::api::API, HandshakeError> {
    let mut me = MediaEngine::default();
    let reg = register_default_interceptors(Registry::new(), &mut me)
        .map_err(|e| peer_error("interceptor setup failed", e))?;
    Ok(APIBuilder::new()
        .with_media_engine(me)
        .with_interceptor_registry(reg)
        .build())
}

pub(crate) fn rtc_configuration(servers: &[IceServer]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: servers.iter().map(RTCIceServer::from).collect(),
        ..Default::default()
    }
}

pub(crate) fn to_rtc_description(
    desc: &SessionDescription,
) -> Result<RTCSessionDescription, HandshakeError> {
    let parsed = match desc.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        DescriptionKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| peer_error("malformed session description", e))
}

pub(crate) fn from_rtc_description(
    desc: &RTCSessionDescription,
    kind: DescriptionKind,
) -> SessionDescription {
    SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    }
}

impl From<RTCIceCandidateInit> for RouteCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<&RouteCandidate> for RTCIceCandidateInit {
    fn from(candidate: &RouteCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}
