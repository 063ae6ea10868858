//! Signaling codec: offer/answer tickets as compact, URL-safe tokens.
//!
//! Token layout: `<version char><url-safe base64, no padding>` where the
//! base64 payload is the Brotli-compressed JSON form of a [`Ticket`]. The
//! alphabet never contains `+`, `/` or `=`, so a token can sit in a URL
//! fragment or query parameter without escaping.

use super::negotiator::{RouteCandidate, SessionDescription};
use crate::core::config::MAX_TICKET_BYTES;
use crate::core::error::DecodeError;
use crate::core::identity::EndpointId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use brotli::{CompressorWriter, Decompressor};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Version prefix for the compact encoding format.
const COMPACT_VERSION: char = '1';

/// Everything the remote side needs to complete its half of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Identity of the endpoint that produced the ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EndpointId>,
    pub description: SessionDescription,
    #[serde(default)]
    pub candidates: Vec<RouteCandidate>,
}

impl Ticket {
    pub fn new(description: SessionDescription, candidates: Vec<RouteCandidate>) -> Self {
        Self {
            origin: None,
            description,
            candidates,
        }
    }

    pub fn with_origin(mut self, origin: EndpointId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn export(&self) -> String {
        encode_ticket(self)
    }

    pub fn parse(token: &str) -> Result<Self, DecodeError> {
        decode_ticket(token)
    }
}

/// Encode a description and its candidates.
pub fn encode(description: &SessionDescription, candidates: &[RouteCandidate]) -> String {
    encode_ticket(&Ticket::new(description.clone(), candidates.to_vec()))
}

/// Inverse of [`encode`].
pub fn decode(token: &str) -> Result<(SessionDescription, Vec<RouteCandidate>), DecodeError> {
    let ticket = decode_ticket(token)?;
    Ok((ticket.description, ticket.candidates))
}

pub fn encode_ticket(ticket: &Ticket) -> String {
    // Serializing plain strings/enums into a Vec cannot fail.
    let json = serde_json::to_vec(ticket).unwrap_or_default();
    let mut compressed = Vec::with_capacity(json.len() / 2);
    {
        let mut compressor = CompressorWriter::new(&mut compressed, 4096, 11, 22);
        // Writes into a Vec never fail.
        let _ = compressor.write_all(&json);
    }
    let mut token = String::with_capacity(1 + compressed.len() * 4 / 3 + 4);
    token.push(COMPACT_VERSION);
    token.push_str(&URL_SAFE_NO_PAD.encode(&compressed));
    token
}

pub fn decode_ticket(token: &str) -> Result<Ticket, DecodeError> {
    let trimmed = token.trim();
    let mut chars = trimmed.chars();
    let version = chars.next().ok_or(DecodeError::Empty)?;
    if version != COMPACT_VERSION {
        return Err(DecodeError::UnknownVersion(version));
    }

    let compressed = URL_SAFE_NO_PAD
        .decode(chars.as_str())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let mut json = Vec::new();
    Decompressor::new(compressed.as_slice(), 4096)
        .take(MAX_TICKET_BYTES as u64 + 1)
        .read_to_end(&mut json)
        .map_err(|e| DecodeError::Decompress(e.to_string()))?;
    if json.len() > MAX_TICKET_BYTES {
        return Err(DecodeError::Decompress(format!(
            "code expands beyond {MAX_TICKET_BYTES} bytes"
        )));
    }

    serde_json::from_slice(&json).map_err(|e| DecodeError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sdp() -> String {
        "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
         a=group:BUNDLE 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
         a=ice-ufrag:EsAw\r\na=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n"
            .to_string()
    }

    fn candidate(n: u16) -> RouteCandidate {
        RouteCandidate {
            candidate: format!("candidate:{n} 1 udp 2130706431 192.168.1.{n} 5{n}000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn test_roundtrip_with_candidates() {
        let desc = SessionDescription::offer(sample_sdp());
        let candidates = vec![candidate(1), candidate(2), RouteCandidate::new("candidate:3")];
        let token = encode(&desc, &candidates);
        assert_eq!(decode(&token).unwrap(), (desc, candidates));
    }

    #[test]
    fn test_roundtrip_without_candidates() {
        let desc = SessionDescription::answer(sample_sdp());
        let token = encode(&desc, &[]);
        assert_eq!(decode(&token).unwrap(), (desc, Vec::new()));
    }

    #[test]
    fn test_roundtrip_keeps_origin() {
        let ticket = Ticket::new(SessionDescription::offer("x"), vec![candidate(7)])
            .with_origin(EndpointId::new("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert_eq!(Ticket::parse(&ticket.export()).unwrap(), ticket);
    }

    #[test]
    fn test_token_is_url_safe() {
        // sdp contains '+' and '/' which must not leak into the token
        let desc = SessionDescription::offer(format!("{}a=fingerprint:sha-256 AB/CD+EF==\r\n", sample_sdp()));
        let token = encode(&desc, &[candidate(9)]);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "{token}"
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_tolerated() {
        let desc = SessionDescription::offer("v=0");
        let token = format!("  {}\n", encode(&desc, &[]));
        assert_eq!(decode(&token).unwrap().0, desc);
    }

    #[test]
    fn test_malformed_tokens_fail_with_decode_error() {
        assert_eq!(decode(""), Err(DecodeError::Empty));
        assert_eq!(decode("   "), Err(DecodeError::Empty));
        assert_eq!(decode("9abc"), Err(DecodeError::UnknownVersion('9')));
        assert!(matches!(decode("1***"), Err(DecodeError::Base64(_))));
        // valid base64, not brotli
        let garbage = format!("1{}", URL_SAFE_NO_PAD.encode([0xFFu8; 32]));
        assert!(matches!(
            decode(&garbage),
            Err(DecodeError::Decompress(_)) | Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_valid_brotli_wrong_shape_is_json_error() {
        let mut compressed = Vec::new();
        {
            let mut w = CompressorWriter::new(&mut compressed, 4096, 11, 22);
            w.write_all(b"{\"hello\":1}").unwrap();
        }
        let token = format!("1{}", URL_SAFE_NO_PAD.encode(&compressed));
        assert!(matches!(decode(&token), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_oversized_expansion_is_refused() {
        let mut compressed = Vec::new();
        {
            let mut w = CompressorWriter::new(&mut compressed, 4096, 11, 22);
            w.write_all(&vec![b' '; 4 * MAX_TICKET_BYTES]).unwrap();
        }
        let token = format!("1{}", URL_SAFE_NO_PAD.encode(&compressed));
        assert!(token.len() < 1024);
        assert!(matches!(decode(&token), Err(DecodeError::Decompress(_))));
    }
}
