//! Data channel legs, frame format and inbound routing
//!
//! - [`RtcDataChannel`] - one `RTCDataChannel` leg reporting to the engine
//! - [`ChannelFrame`] - tagged chat / embedded-protocol frame
//! - [`ChannelRouter`] - two-leg readiness and inbound demultiplexing

mod data_channel;
mod messages;
mod router;

pub use data_channel::RtcDataChannel;
pub use messages::{ChannelFrame, LEGACY_PROTOCOL_KEY, MAX_MESSAGE_SIZE};
pub use router::{ChannelRouter, RoutedMessage};
