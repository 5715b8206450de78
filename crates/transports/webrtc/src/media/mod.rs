//! Local media capture as a capability
//!
//! Capture itself is external. A [`MediaSource`] either grants a set of
//! track descriptions or denies with a reason; a denial never aborts a call,
//! the session simply continues without local media.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stream id used for locally captured tracks
pub const LOCAL_STREAM_ID: &str = "peerlink-local";

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Camera and microphone
    Camera,
    /// Screen share (video only)
    Screen,
}

/// Requested track kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// One local track to attach to a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

impl TrackSpec {
    pub fn new(kind: MediaKind) -> Self {
        let prefix = match kind {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        Self {
            id: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            kind,
            stream_id: LOCAL_STREAM_ID.to_string(),
        }
    }
}

/// Granted local media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMedia {
    pub source: CaptureKind,
    pub tracks: Vec<TrackSpec>,
}

impl LocalMedia {
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Track announced by the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

/// Outcome of a capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCapability {
    Granted(LocalMedia),
    Denied { reason: String },
}

impl MediaCapability {
    pub fn is_granted(&self) -> bool {
        matches!(self, MediaCapability::Granted(_))
    }
}

/// Source of local media (camera/screen capture stand-in)
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, kind: CaptureKind, constraints: MediaConstraints) -> MediaCapability;
}

/// Media source with a fixed answer
///
/// Grants one track per requested kind, or always denies.
///
/// ```
/// use peerlink_webrtc::media::{CaptureKind, MediaConstraints, MediaSource, StaticMediaSource};
///
/// # tokio_test::block_on(async {
/// let camera = StaticMediaSource::granting();
/// let capability = camera
///     .acquire(CaptureKind::Camera, MediaConstraints::default())
///     .await;
/// assert!(capability.is_granted());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticMediaSource {
    denial: Option<String>,
}

impl StaticMediaSource {
    pub fn granting() -> Self {
        Self { denial: None }
    }

    pub fn denying(reason: impl Into<String>) -> Self {
        Self {
            denial: Some(reason.into()),
        }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self, kind: CaptureKind, constraints: MediaConstraints) -> MediaCapability {
        if let Some(reason) = &self.denial {
            return MediaCapability::Denied {
                reason: reason.clone(),
            };
        }

        let mut tracks = Vec::new();
        // Screen capture carries no microphone
        if constraints.audio && kind == CaptureKind::Camera {
            tracks.push(TrackSpec::new(MediaKind::Audio));
        }
        if constraints.video {
            tracks.push(TrackSpec::new(MediaKind::Video));
        }

        if tracks.is_empty() {
            return MediaCapability::Denied {
                reason: format!("no tracks requested for {:?} capture", kind),
            };
        }

        debug!(source = ?kind, tracks = tracks.len(), "Media granted");
        MediaCapability::Granted(LocalMedia {
            source: kind,
            tracks,
        })
    }
}
