//! WebRTC peer backend built on webrtc-rs

mod connection;

pub use connection::{RtcPeer, WebRtcBackend};
