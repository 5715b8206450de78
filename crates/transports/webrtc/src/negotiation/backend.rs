//! Peer connection backend seam
//!
//! The engine drives a peer connection only through these traits. Anything
//! that happens asynchronously inside the backend (gathered candidates,
//! channel lifecycle, inbound text, remote tracks) is reported as a
//! [`PeerEvent`] through the [`PeerEventSink`] handed to
//! [`PeerBackend::create_peer`].

use crate::config::DataChannelMode;
use crate::media::{LocalMedia, RemoteTrackInfo};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Connection state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// The connection cannot recover on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerConnectionState::Failed | PeerConnectionState::Closed)
    }
}

/// Which leg of the chat channel an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelDirection {
    /// Created locally
    Outbound,
    /// Announced by the remote peer
    Inbound,
}

/// Asynchronous happenings inside a peer connection
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    ConnectionState(PeerConnectionState),
    InboundChannel(Arc<dyn ChannelHandle>),
    ChannelOpen {
        direction: ChannelDirection,
        channel_id: String,
    },
    ChannelClosed {
        direction: ChannelDirection,
        channel_id: String,
    },
    ChannelMessage {
        direction: ChannelDirection,
        text: String,
    },
    RemoteTrack(RemoteTrackInfo),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::GatheringComplete => f.write_str("GatheringComplete"),
            PeerEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            PeerEvent::InboundChannel(ch) => f
                .debug_tuple("InboundChannel")
                .field(&ch.label())
                .finish(),
            PeerEvent::ChannelOpen {
                direction,
                channel_id,
            } => f
                .debug_struct("ChannelOpen")
                .field("direction", direction)
                .field("channel_id", channel_id)
                .finish(),
            PeerEvent::ChannelClosed {
                direction,
                channel_id,
            } => f
                .debug_struct("ChannelClosed")
                .field("direction", direction)
                .field("channel_id", channel_id)
                .finish(),
            PeerEvent::ChannelMessage { direction, text } => f
                .debug_struct("ChannelMessage")
                .field("direction", direction)
                .field("len", &text.len())
                .finish(),
            PeerEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(t).finish(),
        }
    }
}

/// Event sink stamped with the connection generation it belongs to
///
/// Events from a torn-down connection carry an old generation and are
/// ignored by the engine.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        if self.tx.send((self.generation, event)).is_err() {
            trace!(generation = self.generation, "Peer event dropped, engine gone");
        }
    }
}

/// Factory for one peer connection per call
#[async_trait]
pub trait PeerBackend: Send + Sync {
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerHandle>>;
}

/// One peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Attach local tracks; must happen before the first description
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()>;

    /// Create the outbound chat channel leg
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelHandle>>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Current local description, including any gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Stop local senders and close the connection
    async fn close(&self) -> Result<()>;
}

/// One data channel leg
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Unique per leg; open and close events carry it
    fn id(&self) -> &str;

    fn label(&self) -> &str;

    fn direction(&self) -> ChannelDirection;

    fn is_open(&self) -> bool;

    /// [`crate::Error::ChannelNotReady`] once the leg is no longer open
    async fn send_text(&self, text: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
