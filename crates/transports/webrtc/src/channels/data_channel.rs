//! WebRTC data channel leg

use crate::config::DataChannelMode;
use crate::negotiation::backend::{ChannelDirection, ChannelHandle, PeerEvent, PeerEventSink};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// One leg of the chat channel backed by an `RTCDataChannel`
///
/// Lifecycle and inbound text are reported to the owning engine through the
/// peer event sink.
pub struct RtcDataChannel {
    id: String,
    label: String,
    direction: ChannelDirection,
    rtc_channel: Arc<RTCDataChannel>,
    open: Arc<AtomicBool>,
}

impl RtcDataChannel {
    /// Create the local (outbound) leg on `peer_connection`
    pub async fn create(
        peer_connection: &RTCPeerConnection,
        label: &str,
        mode: DataChannelMode,
        sink: PeerEventSink,
    ) -> Result<Arc<Self>> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;

        Ok(Self::wrap(rtc_channel, ChannelDirection::Outbound, sink))
    }

    /// Wrap a channel and install its event handlers
    pub fn wrap(
        rtc_channel: Arc<RTCDataChannel>,
        direction: ChannelDirection,
        sink: PeerEventSink,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: rtc_channel.label().to_string(),
            direction,
            open: Arc::new(AtomicBool::new(false)),
            rtc_channel,
        });

        channel.install_handlers(sink);

        // The remote leg may already be open when announced
        if channel.rtc_channel.ready_state() == RTCDataChannelState::Open {
            channel.open.store(true, Ordering::SeqCst);
        }

        channel
    }

    fn install_handlers(&self, sink: PeerEventSink) {
        let direction = self.direction;

        let open = Arc::clone(&self.open);
        let label = self.label.clone();
        let channel_id = self.id.clone();
        let open_sink = sink.clone();
        self.rtc_channel.on_open(Box::new(move || {
            Box::pin(async move {
                debug!("Data channel '{}' ({:?}) opened", label, direction);
                open.store(true, Ordering::SeqCst);
                open_sink.emit(PeerEvent::ChannelOpen {
                    direction,
                    channel_id,
                });
            })
        }));

        let open = Arc::clone(&self.open);
        let label = self.label.clone();
        let channel_id = self.id.clone();
        let close_sink = sink.clone();
        self.rtc_channel.on_close(Box::new(move || {
            let open = Arc::clone(&open);
            let label = label.clone();
            let channel_id = channel_id.clone();
            let sink = close_sink.clone();
            Box::pin(async move {
                debug!("Data channel '{}' ({:?}) closed", label, direction);
                open.store(false, Ordering::SeqCst);
                sink.emit(PeerEvent::ChannelClosed {
                    direction,
                    channel_id,
                });
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        let label = self.label.clone();
        self.rtc_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let sink = sink.clone();
                let label = label.clone();
                Box::pin(async move {
                    if !msg.is_string {
                        debug!("Ignoring {} binary bytes on '{}'", msg.data.len(), label);
                        return;
                    }
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => sink.emit(PeerEvent::ChannelMessage { direction, text }),
                        Err(e) => warn!("Dropping non UTF-8 text on '{}': {}", label, e),
                    }
                })
            }));
    }
}

#[async_trait]
impl ChannelHandle for RtcDataChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn direction(&self) -> ChannelDirection {
        self.direction
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        // A closed leg reports not-ready, like a missing one
        if !self.is_open() {
            return Err(Error::ChannelNotReady(format!(
                "Data channel '{}' is not open (state: {})",
                self.label,
                self.rtc_channel.ready_state()
            )));
        }

        self.rtc_channel
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))?;

        debug!("Sent {} bytes on data channel '{}'", text.len(), self.label);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close data channel: {}", e)))
    }
}
