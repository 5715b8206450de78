//! Configuration types for relay signaling and peer negotiation

use serde::{Deserialize, Serialize};

/// Relay endpoint used when none is configured
pub const DEFAULT_RELAY_URL: &str = "wss://r12aimxa21.execute-api.eu-west-2.amazonaws.com/Prod";

/// Default data channel label
pub const DEFAULT_CHANNEL_LABEL: &str = "peerlink";

/// Main configuration for a peerlink session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLinkConfig {
    /// WebSocket relay URL (ws:// or wss://)
    pub relay_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label of the data channel each side opens
    pub data_channel_label: String,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,

    /// Hold ICE candidates that cannot be applied or routed yet
    pub buffer_early_candidates: bool,

    /// Upper bound for each candidate buffer (range: 1-1024)
    pub max_buffered_candidates: usize,

    /// Capacity of notification broadcast channels (minimum: 16)
    pub event_capacity: usize,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,
            DataChannelMode::Unreliable => Some(0),
        }
    }
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            stun_servers: vec![
                "stun:stun.stunprotocol.org:3478".to_string(),
                "stun:stun.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            data_channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            data_channel_mode: DataChannelMode::Reliable,
            buffer_early_candidates: true,
            max_buffered_candidates: 64,
            event_capacity: 256,
        }
    }
}

impl PeerLinkConfig {
    /// Configuration pointing at a specific relay, defaults elsewhere
    pub fn with_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN server URL does not use `turn:`/`turns:`
    /// - `data_channel_label` is empty
    /// - `max_buffered_candidates` is not in range 1-1024
    /// - `event_capacity` is below 16
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self.stun_servers.iter().find(|s| !s.starts_with("stun:")) {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.data_channel_label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label cannot be empty".to_string(),
            ));
        }

        if self.max_buffered_candidates == 0 || self.max_buffered_candidates > 1024 {
            return Err(Error::InvalidConfig(format!(
                "max_buffered_candidates must be in range 1-1024, got {}",
                self.max_buffered_candidates
            )));
        }

        if self.event_capacity < 16 {
            return Err(Error::InvalidConfig(format!(
                "event_capacity must be at least 16, got {}",
                self.event_capacity
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PeerLinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.stun_servers.len(), 2);
        assert!(config.buffer_early_candidates);
    }

    #[test]
    fn test_invalid_relay_url() {
        let config = PeerLinkConfig::with_relay("http://localhost:8080");
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_empty_stun_servers() {
        let config = PeerLinkConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_turn_url() {
        let config = PeerLinkConfig {
            turn_servers: vec![TurnServerConfig {
                url: "stun:example.com:3478".to_string(),
                username: "u".to_string(),
                credential: "c".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_candidate_buffer_bounds() {
        let mut config = PeerLinkConfig::default();
        config.max_buffered_candidates = 0;
        assert!(config.validate().is_err());
        config.max_buffered_candidates = 1025;
        assert!(config.validate().is_err());
        config.max_buffered_candidates = 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: PeerLinkConfig =
            serde_json::from_str(r#"{"relay_url": "ws://127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.relay_url, "ws://127.0.0.1:9000");
        assert_eq!(config.data_channel_label, DEFAULT_CHANNEL_LABEL);
        assert_eq!(config.data_channel_mode, DataChannelMode::Reliable);
    }

    #[test]
    fn test_data_channel_mode() {
        assert!(DataChannelMode::Reliable.ordered());
        assert_eq!(DataChannelMode::Reliable.max_retransmits(), None);
        assert!(!DataChannelMode::Unreliable.ordered());
        assert_eq!(DataChannelMode::Unreliable.max_retransmits(), Some(0));
    }
}
