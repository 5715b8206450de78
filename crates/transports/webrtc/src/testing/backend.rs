//! Loopback peer backend
//!
//! Peers created from the same [`LoopbackNetwork`] can reach each other.
//! Descriptions are fabricated SDP naming the peer and its tracks. A pair
//! connects once both sides hold a local and a remote description pointing
//! at each other and have each received at least one remote candidate; at
//! that moment every outbound channel gets an inbound counterpart on the
//! other side and both legs open.

use crate::config::DataChannelMode;
use crate::media::{LocalMedia, MediaKind, RemoteTrackInfo, TrackSpec};
use crate::negotiation::{
    ChannelDirection, ChannelHandle, PeerBackend, PeerConnectionState, PeerEvent, PeerEventSink,
    PeerHandle,
};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const PEER_ATTRIBUTE: &str = "a=loopback-peer:";
const TRACK_ATTRIBUTE: &str = "a=loopback-track:";

/// Backend operation that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreatePeer,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
}

struct PeerSlot {
    sink: PeerEventSink,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_peer: Option<u64>,
    remote_candidates: usize,
    connected: bool,
    closed: bool,
    tracks: Vec<TrackSpec>,
    channels: Vec<Arc<LoopbackChannel>>,
}

impl PeerSlot {
    fn can_connect(&self) -> bool {
        !self.closed && self.local.is_some() && self.remote.is_some() && self.remote_candidates > 0
    }
}

#[derive(Default)]
struct NetworkState {
    next_peer: u64,
    peers: HashMap<u64, PeerSlot>,
    failures: Vec<FailPoint>,
    candidate_pool: bool,
}

impl NetworkState {
    fn take_failure(&mut self, point: FailPoint) -> bool {
        match self.failures.iter().position(|p| *p == point) {
            Some(index) => {
                self.failures.remove(index);
                true
            }
            None => false,
        }
    }

    fn slot(&mut self, id: u64) -> Result<&mut PeerSlot> {
        match self.peers.get_mut(&id) {
            Some(slot) if !slot.closed => Ok(slot),
            _ => Err(Error::PeerConnectionError(format!(
                "loopback peer {} is closed",
                id
            ))),
        }
    }

    fn try_connect(&mut self, id: u64) {
        let Some(remote_id) = self.peers.get(&id).and_then(|p| p.remote_peer) else {
            return;
        };
        let (Some(local), Some(remote)) = (self.peers.get(&id), self.peers.get(&remote_id)) else {
            return;
        };
        if local.connected
            || remote.connected
            || remote.remote_peer != Some(id)
            || !local.can_connect()
            || !remote.can_connect()
        {
            return;
        }

        for peer in [id, remote_id] {
            if let Some(slot) = self.peers.get_mut(&peer) {
                slot.connected = true;
                slot.sink
                    .emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
            }
        }
        debug!(id, remote_id, "Loopback peers connected");

        self.pair_channels(id, remote_id);
        self.pair_channels(remote_id, id);
    }

    /// Give every unpaired outbound channel of `from` an inbound twin on `to`
    fn pair_channels(&mut self, from: u64, to: u64) {
        let Some(to_sink) = self.peers.get(&to).map(|p| p.sink.clone()) else {
            return;
        };
        let pending: Vec<Arc<LoopbackChannel>> = match self.peers.get(&from) {
            Some(slot) => slot
                .channels
                .iter()
                .filter(|c| c.direction == ChannelDirection::Outbound && !c.is_paired())
                .cloned()
                .collect(),
            None => return,
        };

        for outbound in pending {
            let inbound =
                LoopbackChannel::new(&outbound.label, ChannelDirection::Inbound, to_sink.clone());
            LoopbackChannel::link(&outbound, &inbound);

            if let Some(slot) = self.peers.get_mut(&to) {
                slot.channels.push(inbound.clone());
            }

            let inbound_id = inbound.id.clone();
            to_sink.emit(PeerEvent::InboundChannel(inbound));
            to_sink.emit(PeerEvent::ChannelOpen {
                direction: ChannelDirection::Inbound,
                channel_id: inbound_id,
            });
            outbound.sink.emit(PeerEvent::ChannelOpen {
                direction: ChannelDirection::Outbound,
                channel_id: outbound.id.clone(),
            });
        }
    }
}

/// Shared medium for loopback peers
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network whose peers pre-gather one candidate as soon as they are
    /// created, before any local description
    pub fn with_candidate_pool() -> Self {
        let network = Self::new();
        network.state.lock().candidate_pool = true;
        network
    }

    /// Backend creating peers on this network
    pub fn backend(&self) -> Arc<LoopbackBackend> {
        Arc::new(LoopbackBackend {
            state: self.state.clone(),
        })
    }

    /// Make the next `point` operation on any peer fail
    pub fn fail_next(&self, point: FailPoint) {
        self.state.lock().failures.push(point);
    }

    /// Peers created and not yet closed
    pub fn open_peers(&self) -> usize {
        self.state.lock().peers.values().filter(|p| !p.closed).count()
    }

    /// Peers ever created
    pub fn total_peers(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Close every channel leg while leaving the connections up
    ///
    /// Legs stop accepting text at once; the close events reach the engines
    /// on their next turn.
    pub fn close_channels(&self) {
        let channels: Vec<Arc<LoopbackChannel>> = self
            .state
            .lock()
            .peers
            .values()
            .flat_map(|slot| slot.channels.iter().cloned())
            .collect();

        for channel in channels {
            channel.shutdown();
        }
    }
}

/// [`PeerBackend`] over a [`LoopbackNetwork`]
pub struct LoopbackBackend {
    state: Arc<Mutex<NetworkState>>,
}

#[async_trait]
impl PeerBackend for LoopbackBackend {
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerHandle>> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::CreatePeer) {
            return Err(Error::PeerConnectionError("injected create_peer failure".to_string()));
        }

        state.next_peer += 1;
        let id = state.next_peer;
        if state.candidate_pool {
            sink.emit(PeerEvent::LocalCandidate(pooled_candidate(id)));
        }
        state.peers.insert(
            id,
            PeerSlot {
                sink,
                local: None,
                remote: None,
                remote_peer: None,
                remote_candidates: 0,
                connected: false,
                closed: false,
                tracks: Vec::new(),
                channels: Vec::new(),
            },
        );

        Ok(Arc::new(LoopbackPeer {
            id,
            state: self.state.clone(),
        }))
    }
}

/// One loopback peer connection
pub struct LoopbackPeer {
    id: u64,
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackPeer {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn fabricate_sdp(&self, tracks: &[TrackSpec]) -> String {
        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- {} 2 IN IP4 127.0.0.1", self.id),
            "s=-".to_string(),
            "t=0 0".to_string(),
            format!("{}{}", PEER_ATTRIBUTE, self.id),
        ];
        for track in tracks {
            let kind = match track.kind {
                MediaKind::Audio => "audio",
                MediaKind::Video => "video",
            };
            lines.push(format!("{}{}:{}:{}", TRACK_ATTRIBUTE, kind, track.id, track.stream_id));
        }
        lines.push("m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_string());
        lines.join("\r\n") + "\r\n"
    }
}

fn host_candidate(id: u64) -> IceCandidate {
    let mut candidate = IceCandidate::new(format!(
        "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
        id,
        40000 + id
    ));
    candidate.username_fragment = Some(format!("loop{}", id));
    candidate
}

fn pooled_candidate(id: u64) -> IceCandidate {
    let mut candidate = IceCandidate::new(format!(
        "candidate:{} 1 udp 2130706175 127.0.0.1 {} typ host",
        id + 1000,
        45000 + id
    ));
    candidate.username_fragment = Some(format!("loop{}", id));
    candidate
}

fn injected(point: FailPoint) -> Error {
    let message = format!("injected {:?} failure", point);
    match point {
        FailPoint::AddIceCandidate => Error::IceCandidateError(message),
        FailPoint::CreatePeer => Error::PeerConnectionError(message),
        _ => Error::SdpError(message),
    }
}

fn parse_peer_id(sdp: &str) -> Result<u64> {
    sdp.lines()
        .find_map(|line| line.strip_prefix(PEER_ATTRIBUTE))
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| Error::SdpError("description names no loopback peer".to_string()))
}

fn parse_tracks(sdp: &str) -> Vec<RemoteTrackInfo> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix(TRACK_ATTRIBUTE))
        .filter_map(|rest| {
            let mut parts = rest.trim().splitn(3, ':');
            let kind = match parts.next()? {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                _ => return None,
            };
            Some(RemoteTrackInfo {
                kind,
                id: parts.next()?.to_string(),
                stream_id: parts.next()?.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl PeerHandle for LoopbackPeer {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        let mut state = self.state.lock();
        state.slot(self.id)?.tracks.extend(media.tracks.iter().cloned());
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelHandle>> {
        let mut state = self.state.lock();
        let slot = state.slot(self.id)?;
        let channel = LoopbackChannel::new(label, ChannelDirection::Outbound, slot.sink.clone());
        slot.channels.push(channel.clone());

        // Opened after connecting: pair right away
        let remote = slot.remote_peer.filter(|_| slot.connected);
        if let Some(remote) = remote {
            state.pair_channels(self.id, remote);
        }

        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::CreateOffer) {
            return Err(injected(FailPoint::CreateOffer));
        }
        let tracks = state.slot(self.id)?.tracks.clone();
        Ok(SessionDescription::offer(self.fabricate_sdp(&tracks)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::CreateAnswer) {
            return Err(injected(FailPoint::CreateAnswer));
        }
        let slot = state.slot(self.id)?;
        if !slot.remote.as_ref().is_some_and(|d| d.kind == SdpKind::Offer) {
            return Err(Error::SdpError("no remote offer to answer".to_string()));
        }
        let tracks = slot.tracks.clone();
        Ok(SessionDescription::answer(self.fabricate_sdp(&tracks)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::SetLocalDescription) {
            return Err(injected(FailPoint::SetLocalDescription));
        }

        let id = self.id;
        let slot = state.slot(id)?;
        slot.local = Some(description);

        slot.sink.emit(PeerEvent::LocalCandidate(host_candidate(id)));
        slot.sink.emit(PeerEvent::GatheringComplete);

        state.try_connect(id);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state
            .lock()
            .peers
            .get(&self.id)
            .and_then(|slot| slot.local.clone())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::SetRemoteDescription) {
            return Err(injected(FailPoint::SetRemoteDescription));
        }

        let remote_id = parse_peer_id(&description.sdp)?;
        let tracks = parse_tracks(&description.sdp);

        let id = self.id;
        let slot = state.slot(id)?;
        slot.remote = Some(description);
        slot.remote_peer = Some(remote_id);
        for track in tracks {
            slot.sink.emit(PeerEvent::RemoteTrack(track));
        }

        state.try_connect(id);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::AddIceCandidate) {
            return Err(injected(FailPoint::AddIceCandidate));
        }

        let id = self.id;
        let slot = state.slot(id)?;
        if slot.remote.is_none() {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        slot.remote_candidates += 1;

        state.try_connect(id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channels = {
            let mut state = self.state.lock();
            let Some(slot) = state.peers.get_mut(&self.id) else {
                return Ok(());
            };
            if slot.closed {
                return Ok(());
            }
            slot.closed = true;
            slot.connected = false;
            slot.sink
                .emit(PeerEvent::ConnectionState(PeerConnectionState::Closed));
            std::mem::take(&mut slot.channels)
        };

        for channel in channels {
            channel.shutdown();
        }
        Ok(())
    }
}

/// One end of a loopback data channel
pub struct LoopbackChannel {
    id: String,
    label: String,
    direction: ChannelDirection,
    sink: PeerEventSink,
    open: AtomicBool,
    closed: AtomicBool,
    counterpart: Mutex<Option<Weak<LoopbackChannel>>>,
}

impl LoopbackChannel {
    fn new(label: &str, direction: ChannelDirection, sink: PeerEventSink) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            direction,
            sink,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counterpart: Mutex::new(None),
        })
    }

    fn link(a: &Arc<Self>, b: &Arc<Self>) {
        *a.counterpart.lock() = Some(Arc::downgrade(b));
        *b.counterpart.lock() = Some(Arc::downgrade(a));
        a.open.store(true, Ordering::SeqCst);
        b.open.store(true, Ordering::SeqCst);
    }

    fn is_paired(&self) -> bool {
        self.counterpart.lock().is_some()
    }

    fn peer_end(&self) -> Option<Arc<LoopbackChannel>> {
        self.counterpart.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Close this end and its counterpart, reporting both
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        self.sink.emit(PeerEvent::ChannelClosed {
            direction: self.direction,
            channel_id: self.id.clone(),
        });

        if let Some(other) = self.peer_end() {
            other.shutdown();
        }
    }
}

#[async_trait]
impl ChannelHandle for LoopbackChannel {
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
        if !self.is_open() {
            return Err(Error::ChannelNotReady(format!(
                "loopback channel {} is not open",
                self.label
            )));
        }

        let other = self
            .peer_end()
            .ok_or_else(|| Error::DataChannelError("loopback channel has no peer".to_string()))?;
        other.sink.emit(PeerEvent::ChannelMessage {
            direction: other.direction,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}
