//! WebRTC peer connection backend

use crate::channels::RtcDataChannel;
use crate::config::{DataChannelMode, PeerLinkConfig};
use crate::media::{LocalMedia, MediaKind, RemoteTrackInfo};
use crate::negotiation::backend::{
    ChannelDirection, ChannelHandle, PeerBackend, PeerConnectionState, PeerEvent, PeerEventSink,
    PeerHandle,
};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Peer backend producing real `RTCPeerConnection`s
pub struct WebRtcBackend {
    api: API,
    rtc_config: RTCConfiguration,
}

impl WebRtcBackend {
    /// Build the WebRTC API (default codecs and interceptors) and ICE server list
    pub fn new(config: &PeerLinkConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl PeerBackend for WebRtcBackend {
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerHandle>> {
        let peer = RtcPeer::new(&self.api, self.rtc_config.clone(), sink).await?;
        Ok(Arc::new(peer))
    }
}

/// One `RTCPeerConnection` reporting to the engine through a sink
pub struct RtcPeer {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    sink: PeerEventSink,

    /// RTP senders of local tracks, stopped on close
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl RtcPeer {
    #[instrument(skip(api, rtc_config, sink), fields(generation = sink.generation()))]
    pub async fn new(
        api: &API,
        rtc_config: RTCConfiguration,
        sink: PeerEventSink,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        info!("Created peer connection {}", connection_id);

        let peer = Self {
            connection_id,
            peer_connection,
            sink,
            senders: Mutex::new(Vec::new()),
        };
        peer.install_handlers();

        Ok(peer)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn install_handlers(&self) {
        let sink = self.sink.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        sink.emit(PeerEvent::GatheringComplete);
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        })),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let sink = self.sink.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                let connection_id = connection_id.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => PeerConnectionState::New,
                        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Connection {} state: {:?}", connection_id, state);
                    sink.emit(PeerEvent::ConnectionState(state));
                })
            }));

        let sink = self.sink.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!("Remote data channel '{}' announced", rtc_channel.label());
                    let channel =
                        RtcDataChannel::wrap(rtc_channel, ChannelDirection::Inbound, sink.clone());
                    sink.emit(PeerEvent::InboundChannel(channel));
                })
            }));

        let sink = self.sink.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        _ => MediaKind::Video,
                    };
                    sink.emit(PeerEvent::RemoteTrack(RemoteTrackInfo {
                        id: track.id(),
                        kind,
                        stream_id: track.stream_id(),
                    }));
                })
            },
        ));
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(Error::SdpError("rollback descriptions are not supported".to_string()))
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse {}: {}", description.kind, e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        _ => return None,
    };
    Some(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait]
impl PeerHandle for RtcPeer {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        for spec in &media.tracks {
            let mime_type = match spec.kind {
                MediaKind::Audio => MIME_TYPE_OPUS,
                MediaKind::Video => MIME_TYPE_VP8,
            };
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_string(),
                    ..Default::default()
                },
                spec.id.clone(),
                spec.stream_id.clone(),
            ));

            let sender = self
                .peer_connection
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaError(format!("Failed to add track {}: {}", spec.id, e)))?;

            // Drain RTCP so interceptors keep running
            let rtcp_sender = Arc::clone(&sender);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while rtcp_sender.read(&mut buf).await.is_ok() {}
            });

            self.senders.lock().push(sender);
            debug!("Added local {:?} track {}", spec.kind, spec.id);
        }
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelHandle>> {
        let channel =
            RtcDataChannel::create(&self.peer_connection, label, mode, self.sink.clone()).await?;
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
            .ok_or_else(|| Error::SdpError("Offer has no description type".to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
            .ok_or_else(|| Error::SdpError("Answer has no description type".to_string()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);

        let senders: Vec<_> = self.senders.lock().drain(..).collect();
        for sender in senders {
            if let Err(e) = sender.stop().await {
                warn!("Failed to stop RTP sender: {}", e);
            }
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CaptureKind, TrackSpec};
    use tokio::sync::mpsc;

    fn sink() -> (PeerEventSink, mpsc::UnboundedReceiver<(u64, PeerEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerEventSink::new(1, tx), rx)
    }

    #[tokio::test]
    async fn test_backend_creates_peer_and_offer() {
        let backend = WebRtcBackend::new(&PeerLinkConfig::default()).unwrap();
        let (sink, _rx) = sink();
        let peer = backend.create_peer(sink).await.unwrap();

        peer.create_data_channel("peerlink", DataChannelMode::Reliable)
            .await
            .unwrap();
        let offer = peer.create_offer().await.unwrap();

        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=application"));
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_with_local_media() {
        let backend = WebRtcBackend::new(&PeerLinkConfig::default()).unwrap();
        let (sink, _rx) = sink();
        let peer = backend.create_peer(sink).await.unwrap();

        let media = LocalMedia {
            source: CaptureKind::Camera,
            tracks: vec![TrackSpec::new(MediaKind::Audio), TrackSpec::new(MediaKind::Video)],
        };
        peer.add_local_media(&media).await.unwrap();

        let offer = peer.create_offer().await.unwrap();
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        peer.close().await.unwrap();
    }

    #[test]
    fn test_description_conversion() {
        assert!(to_rtc_description(SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        })
        .is_err());

        let rtc = RTCSessionDescription::default();
        assert!(from_rtc_description(rtc).is_none());
    }
}
