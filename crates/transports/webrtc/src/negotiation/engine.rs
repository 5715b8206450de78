//! One-to-one negotiation engine
//!
//! Mediates between the relay (unordered, at-most-once string delivery) and
//! the offer/answer/ICE exchange of a single peer connection.
//!
//! All negotiation state lives behind one async mutex. Relay messages are
//! applied by [`NegotiationEngine::handle_relay_message`]; backend callbacks
//! only enqueue [`PeerEvent`]s, which one pump task applies in order under the
//! same mutex.
//!
//! Offer collisions are settled by session id: the side with the lower id is
//! polite, drops its own offer and answers; the other side ignores the
//! colliding offer and waits for that answer.

use super::backend::{ChannelDirection, PeerBackend, PeerEvent, PeerEventSink, PeerHandle};
use super::candidates::CandidateBuffer;
use super::state::{NegotiationState, Role};
use crate::channels::{ChannelFrame, ChannelRouter, RoutedMessage};
use crate::chat::ChatMessage;
use crate::config::PeerLinkConfig;
use crate::media::{
    CaptureKind, LocalMedia, MediaCapability, MediaConstraints, MediaSource, RemoteTrackInfo,
};
use crate::signaling::{
    Classified, IceCandidate, RelayMessage, RelayTransport, SdpKind, SessionDescription,
    SignalEnvelope, SignalPayload,
};
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, error, info, instrument, trace, warn};

/// Negotiation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    CreatePeer,
    CreateDataChannel,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Signaling,
}

/// A rejected negotiation step; the call can be restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationFailure {
    pub stage: FailureStage,
    pub reason: String,
}

impl NegotiationFailure {
    fn new(stage: FailureStage, error: &Error) -> Self {
        Self {
            stage,
            reason: error.to_string(),
        }
    }
}

impl std::fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed: {}", self.stage, self.reason)
    }
}

/// Why an inbound signal was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    MissingUuid,
    SelfEcho,
    Malformed,
    /// Signal from someone other than the current call's peer
    OtherPeer,
    /// Colliding offer ignored by the impolite side
    Collision,
    UnexpectedAnswer,
    /// Pranswer or rollback
    Unsupported,
    /// Candidate before any remote description, with buffering disabled
    NoRemoteDescription,
}

/// What happened to one inbound relay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Applied,
    /// Candidate held until the remote description is set
    Buffered,
    /// Plain text, not a negotiation envelope
    NotSignal,
    Discarded(DiscardReason),
    Failed(NegotiationFailure),
}

/// Notifications broadcast by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    StateChanged {
        from: NegotiationState,
        to: NegotiationState,
    },
    ChannelReady(bool),
    ChatReceived(ChatMessage),
    ProtocolReceived {
        from: String,
        payload: String,
    },
    RemoteTrack(RemoteTrackInfo),
    NegotiationFailed(NegotiationFailure),
}

type StepResult<T> = std::result::Result<T, (FailureStage, Error)>;

trait AtStage<T> {
    fn at(self, stage: FailureStage) -> StepResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: FailureStage) -> StepResult<T> {
        self.map_err(|e| (stage, e))
    }
}

/// State of the current call, guarded by the engine mutex
struct CallState {
    /// Bumped on every connection creation and teardown
    generation: u64,
    role: Option<Role>,
    peer_name: Option<String>,
    peer: Option<Arc<dyn PeerHandle>>,
    router: ChannelRouter,
    remote_description_set: bool,
    /// Local candidates waiting for the peer name
    pending_local: CandidateBuffer,
    /// Remote candidates waiting for the remote description
    pending_remote: CandidateBuffer,
    local_media: Option<LocalMedia>,
}

impl CallState {
    fn new(candidate_capacity: usize) -> Self {
        Self {
            generation: 0,
            role: None,
            peer_name: None,
            peer: None,
            router: ChannelRouter::new(),
            remote_description_set: false,
            pending_local: CandidateBuffer::new(candidate_capacity),
            pending_remote: CandidateBuffer::new(candidate_capacity),
            local_media: None,
        }
    }

    fn active_peer(&self) -> StepResult<Arc<dyn PeerHandle>> {
        self.peer.clone().ok_or_else(|| {
            (
                FailureStage::CreatePeer,
                Error::PeerConnectionError("no active peer connection".to_string()),
            )
        })
    }
}

/// Negotiation engine for one call at a time
pub struct NegotiationEngine {
    config: PeerLinkConfig,

    /// Tag stamped on every outgoing envelope, used to drop relay echoes
    session_id: String,

    relay: Arc<dyn RelayTransport>,
    backend: Arc<dyn PeerBackend>,

    call: Mutex<CallState>,

    state: watch::Sender<NegotiationState>,
    ready: watch::Sender<bool>,
    notifications: broadcast::Sender<EngineNotification>,

    peer_events: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl NegotiationEngine {
    /// Create an engine and start its peer-event pump
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: PeerLinkConfig,
        relay: Arc<dyn RelayTransport>,
        backend: Arc<dyn PeerBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (peer_events, peer_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(NegotiationState::Idle);
        let (ready, _) = watch::channel(false);
        let (notifications, _) = broadcast::channel(config.event_capacity);

        let engine = Arc::new(Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            call: Mutex::new(CallState::new(config.max_buffered_candidates)),
            config,
            relay,
            backend,
            state,
            ready,
            notifications,
            peer_events,
        });

        tokio::spawn(Self::peer_event_pump(Arc::downgrade(&engine), peer_rx));

        info!(session = %engine.session_id, "Negotiation engine created");
        Ok(engine)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Both channel legs are open; callers fall back to the relay otherwise
    pub fn is_channel_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn role(&self) -> Option<Role> {
        self.call.lock().await.role
    }

    pub async fn peer_name(&self) -> Option<String> {
        self.call.lock().await.peer_name.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }

    /// Watch the latest state; short-lived states may be skipped
    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    /// Start a call
    ///
    /// With a peer name this becomes the caller: any previous call is torn
    /// down, the outbound channel leg is created and an offer is sent. Without
    /// one the engine only prepares a connection and answers the first offer.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when a step fails; the engine is back in
    /// `Idle` and a [`EngineNotification::NegotiationFailed`] has been sent.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn start(&self, peer: Option<&str>) -> Result<()> {
        let mut call = self.call.lock().await;
        self.teardown(&mut call, "call restarted").await;

        let result = match peer {
            Some(name) => self.place_call(&mut call, name).await,
            None => self.open_connection(&mut call).await.map(|_| ()),
        };

        match result {
            Ok(()) => Ok(()),
            Err((stage, e)) => {
                self.fail_call(&mut call, stage, &e).await;
                Err(e)
            }
        }
    }

    /// Abort the current call
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn hang_up(&self) {
        let mut call = self.call.lock().await;
        self.teardown(&mut call, "hang up").await;
    }

    /// Apply one message routed by the relay
    #[instrument(skip(self, message), fields(session = %self.session_id, from = %message.from))]
    pub async fn handle_relay_message(&self, message: &RelayMessage) -> InboundOutcome {
        let envelope = match SignalEnvelope::classify(&message.message) {
            Classified::NotSignal => return InboundOutcome::NotSignal,
            Classified::Malformed(reason) => {
                debug!(reason = %reason, "Discarding malformed signal");
                return InboundOutcome::Discarded(DiscardReason::Malformed);
            }
            Classified::Signal(envelope) => envelope,
        };

        let remote_session = match envelope.uuid {
            None => {
                debug!("Discarding signal without session id");
                return InboundOutcome::Discarded(DiscardReason::MissingUuid);
            }
            Some(uuid) if uuid == self.session_id => {
                trace!("Discarding own relayed signal");
                return InboundOutcome::Discarded(DiscardReason::SelfEcho);
            }
            Some(uuid) => uuid,
        };

        let mut call = self.call.lock().await;
        match self
            .apply_signal(&mut call, &message.from, &remote_session, envelope.payload)
            .await
        {
            Ok(outcome) => outcome,
            Err((stage, e)) => InboundOutcome::Failed(self.fail_call(&mut call, stage, &e).await),
        }
    }

    /// Tracks attached to every later connection
    pub async fn set_local_media(&self, media: Option<LocalMedia>) {
        let mut call = self.call.lock().await;
        if call.peer.is_some() {
            debug!("Local media change applies from the next call");
        }
        call.local_media = media;
    }

    /// Ask `source` for media; a denial is logged and the session goes on
    pub async fn acquire_media(
        &self,
        source: &dyn MediaSource,
        kind: CaptureKind,
        constraints: MediaConstraints,
    ) -> MediaCapability {
        let capability = source.acquire(kind, constraints).await;
        match &capability {
            MediaCapability::Granted(media) => {
                info!(source = ?kind, tracks = media.tracks.len(), "Local media acquired");
                self.set_local_media(Some(media.clone())).await;
            }
            MediaCapability::Denied { reason } => {
                warn!(source = ?kind, reason = %reason, "Media capture denied, continuing without local media");
            }
        }
        capability
    }

    /// Send chat text over the data channel
    ///
    /// # Errors
    ///
    /// [`Error::ChannelNotReady`] unless both legs are open.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        self.send_frame(ChannelFrame::chat(text)).await
    }

    /// Send an embedded-protocol payload over the data channel
    pub async fn send_protocol(&self, payload: &str) -> Result<()> {
        self.send_frame(ChannelFrame::protocol(payload)).await
    }

    async fn send_frame(&self, frame: ChannelFrame) -> Result<()> {
        let channel = self.call.lock().await.router.sender()?;
        channel.send_text(&frame.encode()?).await
    }

    /// Wait until the state equals `target`
    pub async fn wait_for_state(&self, target: NegotiationState, timeout: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map(|waited| waited.map(|_| ()));
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Other(anyhow::anyhow!("negotiation engine dropped"))),
            Err(_) => Err(Error::OperationTimeout(format!(
                "state {} not reached within {:?}",
                target, timeout
            ))),
        }
    }

    /// Wait until both channel legs are open
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.ready.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.map(|_| ()));
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Other(anyhow::anyhow!("negotiation engine dropped"))),
            Err(_) => Err(Error::OperationTimeout(format!(
                "channel not ready within {:?}",
                timeout
            ))),
        }
    }

    async fn place_call(&self, call: &mut CallState, name: &str) -> StepResult<()> {
        let peer = self.open_connection(call).await?;
        call.role = Some(Role::Caller);
        call.peer_name = Some(name.to_string());
        self.transition(NegotiationState::Offering);

        let channel = peer
            .create_data_channel(&self.config.data_channel_label, self.config.data_channel_mode)
            .await
            .at(FailureStage::CreateDataChannel)?;
        call.router.attach(ChannelDirection::Outbound, channel);

        let offer = peer.create_offer().await.at(FailureStage::CreateOffer)?;
        peer.set_local_description(offer.clone())
            .await
            .at(FailureStage::SetLocalDescription)?;
        let local = peer.local_description().await.unwrap_or(offer);

        self.send_signal(name, SignalPayload::Sdp(local))
            .await
            .at(FailureStage::Signaling)?;

        info!(peer = %name, "Offer sent");
        Ok(())
    }

    async fn open_connection(&self, call: &mut CallState) -> StepResult<Arc<dyn PeerHandle>> {
        call.generation += 1;
        let sink = PeerEventSink::new(call.generation, self.peer_events.clone());
        let peer = self
            .backend
            .create_peer(sink)
            .await
            .at(FailureStage::CreatePeer)?;

        if let Some(media) = &call.local_media {
            if let Err(e) = peer.add_local_media(media).await {
                warn!("Continuing without local media: {}", e);
            }
        }

        debug!(generation = call.generation, "Peer connection created");
        call.peer = Some(peer.clone());
        Ok(peer)
    }

    async fn apply_signal(
        &self,
        call: &mut CallState,
        from: &str,
        remote_session: &str,
        payload: SignalPayload,
    ) -> StepResult<InboundOutcome> {
        let is_offer = matches!(&payload, SignalPayload::Sdp(d) if d.kind == SdpKind::Offer);

        if let Some(bound) = call.peer_name.clone() {
            if bound != from {
                if self.state() == NegotiationState::Idle && is_offer {
                    self.teardown(call, "offer from another peer").await;
                } else {
                    debug!(bound = %bound, "Discarding signal from another peer");
                    return Ok(InboundOutcome::Discarded(DiscardReason::OtherPeer));
                }
            }
        }

        if call.peer.is_none() {
            debug!("Inbound signal without a connection, preparing to answer");
            self.open_connection(call).await?;
        }

        if call.peer_name.is_none() {
            call.peer_name = Some(from.to_string());
            self.flush_local_candidates(call).await;
        }

        match payload {
            SignalPayload::Sdp(description) => {
                self.apply_description(call, from, remote_session, description)
                    .await
            }
            SignalPayload::Ice(candidate) => Ok(self.apply_remote_candidate(call, candidate).await),
        }
    }

    async fn apply_description(
        &self,
        call: &mut CallState,
        from: &str,
        remote_session: &str,
        description: SessionDescription,
    ) -> StepResult<InboundOutcome> {
        match description.kind {
            SdpKind::Offer => {
                match self.state() {
                    NegotiationState::Idle => {}
                    NegotiationState::Offering if self.session_id.as_str() < remote_session => {
                        info!(peer = %from, "Offer collision, yielding to remote offer");
                        self.teardown(call, "offer collision").await;
                        self.open_connection(call).await?;
                        call.peer_name = Some(from.to_string());
                    }
                    NegotiationState::Offering => {
                        info!(peer = %from, "Offer collision, keeping local offer");
                        return Ok(InboundOutcome::Discarded(DiscardReason::Collision));
                    }
                    other => {
                        // No in-call renegotiation: a fresh offer from the bound peer restarts the call
                        info!(peer = %from, state = %other, "Peer restarted the call");
                        self.teardown(call, "peer restarted call").await;
                        self.open_connection(call).await?;
                        call.peer_name = Some(from.to_string());
                    }
                }

                self.answer_offer(call, from, description).await?;
                Ok(InboundOutcome::Applied)
            }
            SdpKind::Answer => {
                if self.state() != NegotiationState::Offering {
                    debug!(state = %self.state(), "Discarding unexpected answer");
                    return Ok(InboundOutcome::Discarded(DiscardReason::UnexpectedAnswer));
                }

                let peer = call.active_peer()?;
                peer.set_remote_description(description)
                    .await
                    .at(FailureStage::SetRemoteDescription)?;
                call.remote_description_set = true;
                self.flush_remote_candidates(call).await;

                self.transition(NegotiationState::Connected);
                self.refresh_readiness(call);

                info!(peer = %from, "Answer applied");
                Ok(InboundOutcome::Applied)
            }
            SdpKind::Pranswer | SdpKind::Rollback => {
                debug!(kind = %description.kind, "Ignoring unsupported description");
                Ok(InboundOutcome::Discarded(DiscardReason::Unsupported))
            }
        }
    }

    async fn answer_offer(
        &self,
        call: &mut CallState,
        from: &str,
        offer: SessionDescription,
    ) -> StepResult<()> {
        let peer = call.active_peer()?;
        call.role = Some(Role::Answerer);
        self.transition(NegotiationState::Answering);

        peer.set_remote_description(offer)
            .await
            .at(FailureStage::SetRemoteDescription)?;
        call.remote_description_set = true;
        self.flush_remote_candidates(call).await;

        // The answerer owns an outbound leg too; it rides the offered SCTP association
        if !call.router.has_leg(ChannelDirection::Outbound) {
            let channel = peer
                .create_data_channel(&self.config.data_channel_label, self.config.data_channel_mode)
                .await
                .at(FailureStage::CreateDataChannel)?;
            call.router.attach(ChannelDirection::Outbound, channel);
        }

        let answer = peer.create_answer().await.at(FailureStage::CreateAnswer)?;
        peer.set_local_description(answer.clone())
            .await
            .at(FailureStage::SetLocalDescription)?;
        let local = peer.local_description().await.unwrap_or(answer);

        self.send_signal(from, SignalPayload::Sdp(local))
            .await
            .at(FailureStage::Signaling)?;

        self.transition(NegotiationState::Connected);
        self.refresh_readiness(call);

        info!(peer = %from, "Answer sent");
        Ok(())
    }

    async fn apply_remote_candidate(
        &self,
        call: &mut CallState,
        candidate: IceCandidate,
    ) -> InboundOutcome {
        if !call.remote_description_set {
            if !self.config.buffer_early_candidates {
                warn!("Dropping remote candidate received before the remote description");
                return InboundOutcome::Discarded(DiscardReason::NoRemoteDescription);
            }
            if call.pending_remote.push(candidate).is_some() {
                warn!("Remote candidate buffer full, dropped the oldest");
            }
            return InboundOutcome::Buffered;
        }

        let peer = match call.peer.clone() {
            Some(peer) => peer,
            None => return InboundOutcome::Discarded(DiscardReason::NoRemoteDescription),
        };

        match peer.add_ice_candidate(candidate).await {
            Ok(()) => InboundOutcome::Applied,
            Err(e) => {
                // A bad candidate does not end the call
                warn!("Failed to add remote candidate: {}", e);
                let failure = NegotiationFailure::new(FailureStage::AddIceCandidate, &e);
                self.notify(EngineNotification::NegotiationFailed(failure.clone()));
                InboundOutcome::Failed(failure)
            }
        }
    }

    async fn flush_remote_candidates(&self, call: &mut CallState) {
        let Some(peer) = call.peer.clone() else {
            return;
        };
        let pending = call.pending_remote.drain();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Applying buffered remote candidates");
        }
        for candidate in pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!("Failed to add buffered remote candidate: {}", e);
            }
        }
    }

    async fn flush_local_candidates(&self, call: &mut CallState) {
        let Some(name) = call.peer_name.clone() else {
            return;
        };
        let pending = call.pending_local.drain();
        if !pending.is_empty() {
            debug!(count = pending.len(), peer = %name, "Sending buffered local candidates");
        }
        for candidate in pending {
            if let Err(e) = self.send_signal(&name, SignalPayload::Ice(candidate)).await {
                warn!("Failed to send buffered local candidate: {}", e);
            }
        }
    }

    async fn send_signal(&self, to: &str, payload: SignalPayload) -> Result<()> {
        let envelope = SignalEnvelope {
            uuid: Some(self.session_id.clone()),
            payload,
        };
        self.relay.communicate(to, &envelope.encode()?).await
    }

    async fn peer_event_pump(
        engine: Weak<Self>,
        mut rx: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
    ) {
        while let Some((generation, event)) = rx.recv().await {
            let Some(strong) = engine.upgrade() else {
                break;
            };
            strong.handle_peer_event(generation, event).await;
        }

        debug!("Peer event pump terminated");
    }

    async fn handle_peer_event(&self, generation: u64, event: PeerEvent) {
        let mut call = self.call.lock().await;

        if generation != call.generation {
            trace!(generation, current = call.generation, ?event, "Ignoring stale peer event");
            if let PeerEvent::InboundChannel(channel) = event {
                let _ = channel.close().await;
            }
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => match call.peer_name.clone() {
                Some(name) => {
                    if let Err(e) = self.send_signal(&name, SignalPayload::Ice(candidate)).await {
                        warn!("Failed to send local candidate: {}", e);
                    }
                }
                None if self.config.buffer_early_candidates => {
                    if call.pending_local.push(candidate).is_some() {
                        warn!("Local candidate buffer full, dropped the oldest");
                    }
                }
                None => warn!("Dropping local candidate, remote peer not known yet"),
            },
            PeerEvent::GatheringComplete => debug!("ICE gathering complete"),
            PeerEvent::ConnectionState(state) => {
                info!(?state, "Peer connection state changed");
                if state.is_terminal() {
                    self.teardown(&mut call, "peer connection ended").await;
                }
            }
            PeerEvent::InboundChannel(channel) => {
                if let Some(previous) = call.router.attach(ChannelDirection::Inbound, channel) {
                    let _ = previous.close().await;
                }
                self.refresh_readiness(&call);
            }
            PeerEvent::ChannelOpen {
                direction,
                channel_id,
            } => {
                debug!(?direction, channel_id = %channel_id, "Channel leg open");
                if call.router.mark_open(direction, &channel_id) {
                    self.refresh_readiness(&call);
                }
            }
            PeerEvent::ChannelClosed {
                direction,
                channel_id,
            } => {
                if call.router.mark_closed(direction, &channel_id) {
                    info!(?direction, "Channel leg closed");
                    self.teardown(&mut call, "data channel closed").await;
                } else {
                    trace!(?direction, channel_id = %channel_id, "Ignoring close of a replaced leg");
                }
            }
            PeerEvent::ChannelMessage { direction, text } => {
                let from = call.peer_name.clone().unwrap_or_default();
                trace!(?direction, len = text.len(), "Channel message");
                match call.router.route_inbound(&from, &text) {
                    RoutedMessage::Chat(message) => {
                        self.notify(EngineNotification::ChatReceived(message))
                    }
                    RoutedMessage::Protocol { from, payload } => {
                        self.notify(EngineNotification::ProtocolReceived { from, payload })
                    }
                }
            }
            PeerEvent::RemoteTrack(track) => {
                info!(track = %track.id, kind = ?track.kind, "Remote track");
                self.notify(EngineNotification::RemoteTrack(track));
            }
        }
    }

    async fn fail_call(
        &self,
        call: &mut CallState,
        stage: FailureStage,
        error: &Error,
    ) -> NegotiationFailure {
        let failure = NegotiationFailure::new(stage, error);
        error!(stage = ?stage, "Negotiation failed: {}", error);
        self.notify(EngineNotification::NegotiationFailed(failure.clone()));
        self.teardown(call, "negotiation failed").await;
        failure
    }

    /// Close channels and connection and return to Idle
    async fn teardown(&self, call: &mut CallState, reason: &str) {
        let state = self.state();
        if call.peer.is_none() && call.peer_name.is_none() && state == NegotiationState::Idle {
            return;
        }

        call.generation += 1;
        call.router.close_all().await;
        if let Some(peer) = call.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }

        call.role = None;
        call.peer_name = None;
        call.remote_description_set = false;
        call.pending_local.clear();
        call.pending_remote.clear();

        self.set_ready(false);
        if state != NegotiationState::Idle {
            self.transition(NegotiationState::Closed);
            self.transition(NegotiationState::Idle);
        }

        info!(reason, "Call torn down");
    }

    fn refresh_readiness(&self, call: &CallState) {
        let ready = call.router.is_ready();
        if ready && self.state() == NegotiationState::Connected {
            self.transition(NegotiationState::ChannelOpen);
        }
        self.set_ready(ready);
    }

    fn transition(&self, next: NegotiationState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(from = %previous, to = %next, "Ignoring illegal state transition");
            return;
        }

        self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Negotiation state changed");
        self.notify(EngineNotification::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn set_ready(&self, ready: bool) {
        let changed = self.ready.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        });
        if changed {
            info!(ready, "Channel readiness changed");
            self.notify(EngineNotification::ChannelReady(ready));
        }
    }

    fn notify(&self, notification: EngineNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}
