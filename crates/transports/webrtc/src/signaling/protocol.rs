//! Relay wire protocol
//!
//! Outbound frames are routed by the relay's `sendmessage` route:
//!
//! ```text
//! {"message": "sendmessage", "data": {"action": "register", "payload": "alice"}}
//! {"message": "sendmessage", "data": {"action": "communicate", "payload": {"to": "bob", "message": "hi"}, "from": "alice"}}
//! ```
//!
//! Inbound frames carry an `action` discriminator:
//!
//! ```text
//! {"action": "registerSuccess", "payload": "alice"}
//! {"action": "communticate", "payload": {"from": "bob", "message": "hi"}}
//! ```
//!
//! Any other inbound action means registration failed. The two meanings are
//! split into disjoint [`RelayEvent`] variants at decode time.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Route name every outbound frame is addressed to
pub const SEND_MESSAGE_ROUTE: &str = "sendmessage";

/// Inbound action confirming a registration
pub const REGISTER_SUCCESS_ACTION: &str = "registerSuccess";

/// Inbound action carrying a relayed message (the relay's own spelling)
pub const COMMUNICATE_INBOUND_ACTION: &str = "communticate";

/// Correctly spelled variant, accepted as an alias
pub const COMMUNICATE_INBOUND_ALIAS: &str = "communicate";

/// Action used when a relay stand-in reports a rejected registration
pub const REGISTER_FAILED_ACTION: &str = "registerFailed";

/// Outbound relay frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Relay route, always [`SEND_MESSAGE_ROUTE`]
    pub message: String,

    /// Routed command
    pub data: RelayCommand,
}

/// Command carried inside an outbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayCommand {
    /// Command kind
    pub action: RelayAction,

    /// Command payload, shape depends on `action`
    pub payload: CommandPayload,

    /// Registered name of the sender, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Outbound command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayAction {
    /// Claim a display name
    Register,
    /// Route a message to another registered name
    Communicate,
}

/// Outbound payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandPayload {
    /// Display name for `register`
    Name(String),
    /// Addressed message for `communicate`
    Communicate(CommunicatePayload),
}

/// Addressed message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicatePayload {
    /// Recipient display name
    pub to: String,
    /// Opaque message text (chat or serialized negotiation envelope)
    pub message: String,
}

impl RelayRequest {
    /// Registration request for `name`
    pub fn register(name: impl Into<String>) -> Self {
        Self::new(RelayAction::Register, CommandPayload::Name(name.into()))
    }

    /// Message routed to `to`
    pub fn communicate(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            RelayAction::Communicate,
            CommandPayload::Communicate(CommunicatePayload {
                to: to.into(),
                message: message.into(),
            }),
        )
    }

    fn new(action: RelayAction, payload: CommandPayload) -> Self {
        Self {
            message: SEND_MESSAGE_ROUTE.to_string(),
            data: RelayCommand {
                action,
                payload,
                from: None,
            },
        }
    }

    /// Stamp the sender name
    pub fn with_from(mut self, from: Option<String>) -> Self {
        self.data.from = from;
        self
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Outcome of a registration round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    /// Whether the relay accepted the name
    pub result: bool,
    /// Confirmed name, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Message relayed from another peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Sender display name
    pub from: String,
    /// Recipient display name, when the relay echoes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Opaque message text
    pub message: String,
}

impl RelayMessage {
    /// Create a relayed message
    pub fn new(from: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: None,
            message: message.into(),
        }
    }
}

/// Notifications produced by a relay connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Answer to a registration request
    Registered(RegistrationOutcome),
    /// Message routed to us by another peer
    Message(RelayMessage),
    /// The relay connection ended
    Closed,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl RelayEvent {
    /// Decode one inbound relay frame
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON with an `action` field, or
    /// if a relayed-message frame lacks `from`/`message`.
    pub fn decode(text: &str) -> Result<Self> {
        let frame: InboundFrame = serde_json::from_str(text)?;

        match frame.action.as_str() {
            REGISTER_SUCCESS_ACTION => Ok(RelayEvent::Registered(RegistrationOutcome {
                result: true,
                name: frame.payload.as_str().map(str::to_string),
            })),
            COMMUNICATE_INBOUND_ACTION | COMMUNICATE_INBOUND_ALIAS => {
                let message: RelayMessage =
                    serde_json::from_value(frame.payload).map_err(|e| {
                        Error::SerializationError(format!("Invalid relayed message: {}", e))
                    })?;
                Ok(RelayEvent::Message(message))
            }
            _ => Ok(RelayEvent::Registered(RegistrationOutcome {
                result: false,
                name: None,
            })),
        }
    }

    /// Encode as the inbound frame a relay would deliver
    ///
    /// Used by relay stand-ins; `Closed` has no wire form.
    pub fn encode_frame(&self) -> Result<String> {
        let value = match self {
            RelayEvent::Registered(RegistrationOutcome {
                result: true,
                name,
            }) => serde_json::json!({
                "action": REGISTER_SUCCESS_ACTION,
                "payload": name,
            }),
            RelayEvent::Registered(_) => serde_json::json!({
                "action": REGISTER_FAILED_ACTION,
                "payload": serde_json::Value::Null,
            }),
            RelayEvent::Message(message) => serde_json::json!({
                "action": COMMUNICATE_INBOUND_ACTION,
                "payload": message,
            }),
            RelayEvent::Closed => {
                return Err(Error::SerializationError(
                    "Closed has no wire representation".to_string(),
                ))
            }
        };
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_shape() {
        let json = RelayRequest::register("alice").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["message"], "sendmessage");
        assert_eq!(value["data"]["action"], "register");
        assert_eq!(value["data"]["payload"], "alice");
        assert!(value["data"].get("from").is_none());
    }

    #[test]
    fn test_communicate_request_with_from() {
        let request = RelayRequest::communicate("bob", "hello").with_from(Some("alice".into()));
        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["data"]["action"], "communicate");
        assert_eq!(value["data"]["payload"]["to"], "bob");
        assert_eq!(value["data"]["payload"]["message"], "hello");
        assert_eq!(value["data"]["from"], "alice");
    }

    #[test]
    fn test_request_parses_back() {
        let request = RelayRequest::communicate("bob", "hello");
        let parsed = RelayRequest::from_json(&request.to_json().unwrap()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_decode_register_success() {
        let event = RelayEvent::decode(r#"{"action":"registerSuccess","payload":"alice"}"#).unwrap();
        assert_eq!(
            event,
            RelayEvent::Registered(RegistrationOutcome {
                result: true,
                name: Some("alice".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_communticate() {
        let event =
            RelayEvent::decode(r#"{"action":"communticate","payload":{"from":"bob","message":"hi"}}"#)
                .unwrap();
        assert_eq!(event, RelayEvent::Message(RelayMessage::new("bob", "hi")));
    }

    #[test]
    fn test_decode_unknown_action_is_registration_failure() {
        let event = RelayEvent::decode(r#"{"action":"nameTaken","payload":null}"#).unwrap();
        assert_eq!(
            event,
            RelayEvent::Registered(RegistrationOutcome {
                result: false,
                name: None,
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(RelayEvent::decode("not json").is_err());
        assert!(RelayEvent::decode(r#"{"action":"communticate","payload":{"from":"bob"}}"#).is_err());
    }

    #[test]
    fn test_encode_frame_decodes_to_same_event() {
        let event = RelayEvent::Message(RelayMessage::new("carol", "ping"));
        let frame = event.encode_frame().unwrap();
        assert_eq!(RelayEvent::decode(&frame).unwrap(), event);
        assert!(RelayEvent::Closed.encode_frame().is_err());
    }
}
