//! Peer-to-peer video chat over WebRTC with relay signaling
//!
//! This crate negotiates one-to-one WebRTC calls through an opaque WebSocket
//! message relay and multiplexes chat text and an embedded annotation
//! protocol over the resulting data channel.
//!
//! # Features
//!
//! - **Relay client**: one persistent WebSocket, name registration, routed messages
//! - **Negotiation engine**: offer/answer/ICE state machine with glare handling
//! - **Data channel router**: chat and protocol streams on one channel
//! - **Relay fallback**: chat goes through the relay until the channel is ready
//! - **Pluggable peer backend**: `webrtc` crate in production, loopback in tests
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  UI / CLI                                              │
//! │  ↓                                                     │
//! │  PeerLinkClient (chat log, relay fallback)             │
//! │  ├─ RelayClient (WebSocket, register / communicate)    │
//! │  ├─ NegotiationEngine (one call, explicit states)      │
//! │  │   ├─ PeerBackend → RtcPeer (RTCPeerConnection)      │
//! │  │   └─ ChannelRouter (outbound + inbound legs)        │
//! │  └─ AnnotationTransport (protocol stream)              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peerlink_webrtc::PeerLinkConfig;
//!
//! let config = PeerLinkConfig {
//!     relay_url: "ws://localhost:8080".to_string(),
//!     stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.data_channel_label, "peerlink");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use peerlink_webrtc::{PeerLinkClient, PeerLinkConfig, RelayClient, WebRtcBackend};
//! use std::sync::Arc;
//!
//! # async fn example() -> peerlink_webrtc::Result<()> {
//! let config = PeerLinkConfig::default();
//! let relay = Arc::new(RelayClient::new(&config.relay_url, config.event_capacity));
//! relay.connect().await?;
//!
//! let backend = Arc::new(WebRtcBackend::new(&config)?);
//! let client = PeerLinkClient::new(config, relay, backend)?;
//!
//! client.register("alice").await?;
//! client.call(Some("bob")).await?;
//! client.send_message("bob", "hello").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

// Public modules
pub mod annotation;
pub mod channels;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use annotation::{AnnotationMode, AnnotationTransport, ProtocolSender, TransportEvent};
pub use chat::{ChatLog, ChatMessage, ChatVia};
pub use client::{ClientEvent, PeerLinkClient};
pub use config::{DataChannelMode, PeerLinkConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use negotiation::{
    EngineNotification, InboundOutcome, NegotiationEngine, NegotiationFailure, NegotiationState,
    Role,
};
pub use peer::WebRtcBackend;
pub use signaling::{RelayClient, RelayEvent, RelayMessage, RelayTransport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
