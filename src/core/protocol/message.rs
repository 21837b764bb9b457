//! Wire messages exchanged over a chat channel.
//!
//! Every message is one UTF-8 JSON text frame tagged by `"type"`. Field
//! names are camelCase; chunk payloads travel as arrays of byte values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    Text(TextMessage),
    FileOffer(FileOffer),
    FileChunk(FileChunk),
    FileComplete(FileComplete),
    FileCancel(FileCancel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub content: String,
    pub user_id: String,
    pub nickname: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOffer {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// MIME type; may be empty when unknown.
    #[serde(default)]
    pub file_type: String,
    pub total_chunks: u32,
    pub user_id: String,
    pub nickname: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub transfer_id: String,
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileComplete {
    pub transfer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCancel {
    pub transfer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Message {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::FileOffer(_) => "file-offer",
            Self::FileChunk(_) => "file-chunk",
            Self::FileComplete(_) => "file-complete",
            Self::FileCancel(_) => "file-cancel",
        }
    }

    /// The transfer a file message belongs to.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::FileOffer(m) => Some(&m.transfer_id),
            Self::FileChunk(m) => Some(&m.transfer_id),
            Self::FileComplete(m) => Some(&m.transfer_id),
            Self::FileCancel(m) => Some(&m.transfer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn text_wire_shape() {
        let msg = Message::Text(TextMessage {
            content: "hi".into(),
            user_id: "a1b2c3d4".into(),
            nickname: "User a1b2c3d4".into(),
            timestamp: "2026-01-02T03:04:05Z".parse().unwrap(),
        });
        let v: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["content"], "hi");
        assert_eq!(v["userId"], "a1b2c3d4");
        assert_eq!(v["nickname"], "User a1b2c3d4");
        assert!(v["timestamp"].as_str().unwrap().starts_with("2026-01-02T03:04:05"));
    }

    #[test]
    fn chunk_data_is_byte_array() {
        let msg = Message::FileChunk(FileChunk {
            transfer_id: "t".into(),
            chunk_index: 2,
            data: vec![0, 127, 255],
        });
        let v: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "file-chunk", "transferId": "t", "chunkIndex": 2, "data": [0, 127, 255]}));
    }

    #[test]
    fn decodes_browser_style_offer() {
        let text = r#"{"type":"file-offer","transferId":"1700000000000-abc",
            "fileName":"cat.png","fileSize":70000,"fileType":"image/png",
            "totalChunks":2,"userId":"u1","nickname":"Ann",
            "timestamp":"2024-05-01T10:00:00.000Z"}"#;
        let Message::FileOffer(offer) = Message::decode(text).unwrap() else {
            panic!("expected offer");
        };
        assert_eq!(offer.file_name, "cat.png");
        assert_eq!(offer.total_chunks, 2);
        assert_eq!(offer.file_type, "image/png");
    }

    #[test]
    fn complete_without_checksum() {
        let msg = Message::decode(r#"{"type":"file-complete","transferId":"t"}"#).unwrap();
        assert_eq!(
            msg,
            Message::FileComplete(FileComplete {
                transfer_id: "t".into(),
                checksum: None
            })
        );
        assert_eq!(msg.encode().unwrap(), r#"{"type":"file-complete","transferId":"t"}"#);
    }

    #[test]
    fn kind_matches_wire_type() {
        let cancel = Message::decode(r#"{"type":"file-cancel","transferId":"t9"}"#).unwrap();
        assert_eq!(cancel.kind(), "file-cancel");
        assert_eq!(cancel.transfer_id(), Some("t9"));
        let v: Value = serde_json::from_str(&cancel.encode().unwrap()).unwrap();
        assert_eq!(v["type"], cancel.kind());
    }

    #[test]
    fn rejects_unknown_type_and_bad_bytes() {
        assert!(Message::decode(r#"{"type":"ping"}"#).is_err());
        assert!(Message::decode(r#"{"type":"file-chunk","transferId":"t","chunkIndex":0,"data":[256]}"#).is_err());
        assert!(Message::decode("not json").is_err());
    }
}
