//! Shareable links.
//!
//! Discovery mode shares `{origin}?peer={id}`; manual mode shares the offer
//! code in the fragment, `{origin}#session={token}`, so it never reaches a
//! web server's logs.

use crate::core::config::{LINK_PEER_PARAM, LINK_SESSION_KEY};
use crate::core::error::ValidationError;
use crate::core::identity::EndpointId;
use url::Url;

/// What a link asks its receiver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Peer(EndpointId),
    Offer(String),
}

pub fn peer_link(origin: &Url, id: &EndpointId) -> String {
    let mut url = origin.clone();
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair(LINK_PEER_PARAM, id.as_str());
    url.to_string()
}

pub fn offer_link(origin: &Url, token: &str) -> String {
    let mut url = origin.clone();
    url.set_query(None);
    url.set_fragment(Some(&format!("{LINK_SESSION_KEY}={token}")));
    url.to_string()
}

pub fn parse(link: &str) -> Result<LinkTarget, ValidationError> {
    let url = Url::parse(link.trim()).map_err(|_| ValidationError::MalformedLink)?;

    if let Some(token) = url
        .fragment()
        .and_then(|f| f.strip_prefix(LINK_SESSION_KEY))
        .and_then(|rest| rest.strip_prefix('='))
        .filter(|token| !token.is_empty())
    {
        return Ok(LinkTarget::Offer(token.to_string()));
    }

    url.query_pairs()
        .find(|(key, value)| key == LINK_PEER_PARAM && !value.is_empty())
        .map(|(_, value)| LinkTarget::Peer(EndpointId::new(value.into_owned())))
        .ok_or(ValidationError::MalformedLink)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://localhost:5173").unwrap()
    }

    #[test]
    fn test_peer_link_for_assigned_id() {
        let link = peer_link(&origin(), &"abc-123".into());
        assert_eq!(link, "http://localhost:5173/?peer=abc-123");
        assert_eq!(parse(&link), Ok(LinkTarget::Peer("abc-123".into())));
    }

    #[test]
    fn test_peer_link_replaces_existing_query() {
        let base = Url::parse("https://example.org/app/?peer=old#session=x").unwrap();
        assert_eq!(
            peer_link(&base, &"new".into()),
            "https://example.org/app/?peer=new"
        );
    }

    #[test]
    fn test_offer_link_round_trip() {
        let link = offer_link(&origin(), "1G2xA-_b");
        assert_eq!(link, "http://localhost:5173/#session=1G2xA-_b");
        assert_eq!(parse(&link), Ok(LinkTarget::Offer("1G2xA-_b".into())));
    }

    #[test]
    fn test_rejects_links_without_target() {
        assert_eq!(parse("not a url"), Err(ValidationError::MalformedLink));
        assert_eq!(
            parse("http://localhost:5173/?other=1"),
            Err(ValidationError::MalformedLink)
        );
        assert_eq!(
            parse("http://localhost:5173/?peer="),
            Err(ValidationError::MalformedLink)
        );
    }
}
