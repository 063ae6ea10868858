//! Text-message framing on an open channel.
//!
//! Every text message is one JSON object:
//!
//! - user text: `{"text": "..."}`
//! - file announcement: `{"__fileMeta": true, "name", "size", "type"}`
//! - rejection: `{"type": "reject", "reason"}`
//! - whole file: `{"file": "<base64>", "filename", "filetype"}`
//!
//! Binary messages are raw file slices and never pass through here. A text
//! message that is not a JSON object, or an object of no known shape, is
//! delivered as plain user text.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Reserved marker field of the announcement frame.
pub const FILE_META_MARKER: &str = "__fileMeta";
/// `type` value of the rejection frame.
const REJECT_TYPE: &str = "reject";

mod base64_bytes {
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnouncement {
    #[serde(rename = "__fileMeta")]
    marker: bool,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime: String,
}

impl FileAnnouncement {
    pub fn new(name: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        Self {
            marker: true,
            name: name.into(),
            size,
            mime: mime.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Rejection {
    #[serde(rename = "type")]
    kind: String,
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TextEnvelope {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WholeFile {
    #[serde(with = "base64_bytes")]
    pub file: Bytes,
    pub filename: String,
    #[serde(default)]
    pub filetype: String,
}

/// A decoded inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Announce(FileAnnouncement),
    Reject { reason: String },
    WholeFile(WholeFile),
}

pub fn encode_text(text: &str) -> String {
    json_string(&TextEnvelope {
        text: text.to_string(),
    })
}

pub fn encode_announcement(announcement: &FileAnnouncement) -> String {
    json_string(announcement)
}

pub fn encode_rejection(reason: &str) -> String {
    json_string(&Rejection {
        kind: REJECT_TYPE.to_string(),
        reason: reason.to_string(),
    })
}

pub fn encode_whole_file(file: &WholeFile) -> String {
    json_string(file)
}

fn json_string<T: Serialize>(value: &T) -> String {
    // Plain structs of strings/numbers always serialize.
    serde_json::to_string(value).unwrap_or_default()
}

/// Classify one inbound text message.
pub fn decode(raw: &str) -> Frame {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Frame::Text(raw.to_string());
    };
    let value = Value::Object(map);

    if value.get(FILE_META_MARKER).and_then(Value::as_bool) == Some(true) {
        return match serde_json::from_value::<FileAnnouncement>(value) {
            Ok(announcement) => Frame::Announce(announcement),
            Err(e) => {
                warn!(event = "frame_invalid", kind = "announcement", error = %e, "Malformed file announcement");
                Frame::Text(raw.to_string())
            }
        };
    }
    if value.get("type").and_then(Value::as_str) == Some(REJECT_TYPE) {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("rejected by peer")
            .to_string();
        return Frame::Reject { reason };
    }
    if value.get("file").is_some() {
        return match serde_json::from_value::<WholeFile>(value) {
            Ok(file) => Frame::WholeFile(file),
            Err(e) => {
                warn!(event = "frame_invalid", kind = "whole_file", error = %e, "Malformed whole-file frame");
                Frame::Text(raw.to_string())
            }
        };
    }
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Frame::Text(text.to_string());
    }
    Frame::Text(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_wire_shape() {
        let encoded = encode_announcement(&FileAnnouncement::new("a.txt", 10, "text/plain"));
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"__fileMeta": true, "name": "a.txt", "size": 10, "type": "text/plain"})
        );
        assert_eq!(
            decode(&encoded),
            Frame::Announce(FileAnnouncement::new("a.txt", 10, "text/plain"))
        );
    }

    #[test]
    fn test_rejection_wire_shape() {
        let encoded = encode_rejection("busy");
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, serde_json::json!({"type": "reject", "reason": "busy"}));
        assert_eq!(decode(&encoded), Frame::Reject { reason: "busy".into() });
    }

    #[test]
    fn test_user_text_that_looks_like_control_stays_text() {
        let sneaky = r#"{"__fileMeta":true,"name":"x","size":1,"type":""}"#;
        let encoded = encode_text(sneaky);
        assert_eq!(decode(&encoded), Frame::Text(sneaky.to_string()));
    }

    #[test]
    fn test_legacy_raw_text() {
        assert_eq!(decode("hello"), Frame::Text("hello".into()));
        assert_eq!(decode("[1,2]"), Frame::Text("[1,2]".into()));
        assert_eq!(decode(r#"{"other":1}"#), Frame::Text(r#"{"other":1}"#.into()));
    }

    #[test]
    fn test_whole_file_frame() {
        let file = WholeFile {
            file: Bytes::from_static(b"\x00\x01binary"),
            filename: "blob.bin".into(),
            filetype: "application/octet-stream".into(),
        };
        let encoded = encode_whole_file(&file);
        assert!(encoded.contains("\"filename\":\"blob.bin\""));
        assert_eq!(decode(&encoded), Frame::WholeFile(file));
    }

    #[test]
    fn test_announcement_without_type_defaults_mime() {
        let frame = decode(r#"{"__fileMeta":true,"name":"n","size":3}"#);
        assert_eq!(frame, Frame::Announce(FileAnnouncement::new("n", 3, "")));
    }
}
