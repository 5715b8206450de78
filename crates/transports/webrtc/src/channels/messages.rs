//! Data channel frame format
//!
//! One channel carries two logical streams, told apart by an explicit tag:
//!
//! ```text
//! {"kind": "chat", "payload": "hello"}
//! {"kind": "protocol", "payload": "<embedded protocol message>"}
//! ```
//!
//! Peers that predate the tag send chat as bare text and protocol messages
//! as `{"preoccupy": ...}`; decoding accepts both shapes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum encoded frame size (64 KiB, a safe SCTP message size)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Key of the untagged embedded-protocol wrapper
pub const LEGACY_PROTOCOL_KEY: &str = "preoccupy";

/// Frame sent over the chat data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum ChannelFrame {
    /// Free chat text, displayed to the user
    Chat(String),

    /// Embedded annotation-protocol message, never displayed
    Protocol(String),
}

impl ChannelFrame {
    pub fn chat(text: impl Into<String>) -> Self {
        ChannelFrame::Chat(text.into())
    }

    pub fn protocol(payload: impl Into<String>) -> Self {
        ChannelFrame::Protocol(payload.into())
    }

    /// Serialize for the wire, rejecting frames above [`MAX_MESSAGE_SIZE`]
    pub fn encode(&self) -> Result<String> {
        let text = serde_json::to_string(self)?;
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(Error::DataChannelError(format!(
                "Message size {} exceeds maximum {}",
                text.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(text)
    }

    /// Interpret inbound channel text; never fails
    pub fn decode(raw: &str) -> Self {
        if let Ok(frame) = serde_json::from_str::<ChannelFrame>(raw) {
            return frame;
        }

        if let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(raw) {
            match object.remove(LEGACY_PROTOCOL_KEY) {
                Some(Value::String(payload)) => return ChannelFrame::Protocol(payload),
                Some(Value::Null) | None => {}
                Some(other) => return ChannelFrame::Protocol(other.to_string()),
            }
        }

        ChannelFrame::Chat(raw.to_string())
    }
}
