//! Negotiation envelope carried inside relayed messages
//!
//! A relayed `message` string is either free chat text or one JSON envelope:
//!
//! ```text
//! {"uuid": "<session>", "sdp": {"type": "offer", "sdp": "v=0..."}}
//! {"uuid": "<session>", "ice": {"candidate": "candidate:...", "sdpMid": "0", "sdpMLineIndex": 0}}
//! ```
//!
//! [`SignalEnvelope::classify`] decides which of the two a string is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Session description in browser (`RTCSessionDescriptionInit`) shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in browser (`RTCIceCandidateInit`) shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate bound to the first media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }
}

/// Exactly one negotiation item per envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Sdp(SessionDescription),
    Ice(IceCandidate),
}

/// Negotiation envelope tagged with the sender's session uuid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    /// Sender session tag. `None` only for envelopes received without one.
    pub uuid: Option<String>,
    pub payload: SignalPayload,
}

/// Result of inspecting a relayed message string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Well-formed negotiation envelope
    Signal(SignalEnvelope),
    /// Not an envelope at all; treat as chat
    NotSignal,
    /// Looks like an envelope but cannot be used
    Malformed(String),
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdp: Option<&'a SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ice: Option<&'a IceCandidate>,
}

const SIGNAL_KEYS: [&str; 3] = ["uuid", "sdp", "ice"];

impl SignalEnvelope {
    pub fn sdp(uuid: impl Into<String>, description: SessionDescription) -> Self {
        Self {
            uuid: Some(uuid.into()),
            payload: SignalPayload::Sdp(description),
        }
    }

    pub fn ice(uuid: impl Into<String>, candidate: IceCandidate) -> Self {
        Self {
            uuid: Some(uuid.into()),
            payload: SignalPayload::Ice(candidate),
        }
    }

    /// Serialize to the relay `message` string
    pub fn encode(&self) -> Result<String> {
        let (sdp, ice) = match &self.payload {
            SignalPayload::Sdp(description) => (Some(description), None),
            SignalPayload::Ice(candidate) => (None, Some(candidate)),
        };
        let wire = WireEnvelope {
            uuid: self.uuid.as_deref(),
            sdp,
            ice,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse a string that must be an envelope
    pub fn decode(text: &str) -> Result<Self> {
        match Self::classify(text) {
            Classified::Signal(envelope) => Ok(envelope),
            Classified::NotSignal => Err(Error::MalformedSignal(
                "not a negotiation envelope".to_string(),
            )),
            Classified::Malformed(reason) => Err(Error::MalformedSignal(reason)),
        }
    }

    /// Decide whether `text` is chat, an envelope, or a broken envelope
    pub fn classify(text: &str) -> Classified {
        let object = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => object,
            _ => return Classified::NotSignal,
        };

        if !SIGNAL_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Classified::NotSignal;
        }

        match Self::from_object(object) {
            Ok(envelope) => Classified::Signal(envelope),
            Err(reason) => Classified::Malformed(reason),
        }
    }

    fn from_object(mut object: Map<String, Value>) -> std::result::Result<Self, String> {
        let uuid = match object.remove("uuid") {
            None | Some(Value::Null) => None,
            Some(Value::String(uuid)) => Some(uuid),
            Some(other) => return Err(format!("uuid must be a string, got {}", other)),
        };

        let sdp = object.remove("sdp").filter(|v| !v.is_null());
        let ice = object.remove("ice").filter(|v| !v.is_null());

        let payload = match (sdp, ice) {
            (Some(_), Some(_)) => return Err("envelope carries both sdp and ice".to_string()),
            (None, None) => return Err("envelope carries neither sdp nor ice".to_string()),
            (Some(sdp), None) => SignalPayload::Sdp(
                serde_json::from_value(sdp).map_err(|e| format!("invalid sdp: {}", e))?,
            ),
            (None, Some(ice)) => SignalPayload::Ice(
                serde_json::from_value(ice).map_err(|e| format!("invalid ice: {}", e))?,
            ),
        };

        Ok(Self { uuid, payload })
    }
}
