//! The copy-pasted connection descriptor.
//!
//! ```json
//! { "type": "offer", "sdp": { ... }, "userId": "a1b2c3d4",
//!   "nickname": "User a1b2c3d4", "connectionId": "..." }
//! ```
//!
//! `sdp` is opaque to everything but the transport. `connectionId` is
//! optional on input so descriptors from peers that never send it still
//! parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::connection::SdpRole;
use crate::core::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub kind: SdpRole,
    pub sdp: Value,
    pub user_id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl Descriptor {
    /// Parse pasted text. The text must be a JSON object carrying `sdp`;
    /// when `type` is present it must equal `expected`.
    pub fn parse(text: &str, expected: SdpRole) -> Result<Self> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| CoreError::MalformedInput(format!("not valid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(CoreError::MalformedInput("expected a JSON object".into()));
        };

        let sdp = match map.get("sdp") {
            Some(v) if !v.is_null() => v.clone(),
            _ => return Err(CoreError::MalformedInput("missing \"sdp\" field".into())),
        };

        let kind = match map.get("type").and_then(Value::as_str) {
            None => expected,
            Some("offer") => SdpRole::Offer,
            Some("answer") => SdpRole::Answer,
            Some(other) => {
                return Err(CoreError::MalformedInput(format!(
                    "unknown descriptor type \"{other}\""
                )));
            }
        };
        if kind != expected {
            return Err(CoreError::MalformedInput(format!(
                "expected an {expected}, got an {kind}"
            )));
        }

        let text_field = |name: &str| {
            map.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            kind,
            sdp,
            user_id: text_field("userId"),
            nickname: text_field("nickname"),
            connection_id: map
                .get("connectionId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
