//! Application-level client
//!
//! Wires one relay connection, one negotiation engine, the chat log and an
//! optional annotation transport. Two background pumps do the routing:
//!
//! - relay pump: registration results and relayed messages; messages that are
//!   not negotiation signals land in the chat log
//! - engine pump: channel chat lands in the chat log, protocol payloads go to
//!   the annotation transport, everything else is forwarded as a
//!   [`ClientEvent`]

use crate::annotation::{AnnotationMode, AnnotationTransport};
use crate::chat::{ChatLog, ChatMessage, ChatVia};
use crate::config::PeerLinkConfig;
use crate::media::{CaptureKind, MediaCapability, MediaConstraints, MediaSource, RemoteTrackInfo};
use crate::negotiation::{
    EngineNotification, InboundOutcome, NegotiationEngine, NegotiationFailure, NegotiationState,
    PeerBackend,
};
use crate::signaling::{RegistrationOutcome, RelayEvent, RelayTransport};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

type AnnotationSlot = Arc<RwLock<Option<Arc<AnnotationTransport>>>>;

/// Events surfaced to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Registered(RegistrationOutcome),
    Chat(ChatMessage),
    State(NegotiationState),
    ChannelReady(bool),
    NegotiationFailed(NegotiationFailure),
    RemoteTrack(RemoteTrackInfo),
    RelayClosed,
}

/// Relay + engine + chat log
pub struct PeerLinkClient {
    relay: Arc<dyn RelayTransport>,
    engine: Arc<NegotiationEngine>,
    chat: Arc<ChatLog>,
    name: Arc<RwLock<Option<String>>>,
    annotation: AnnotationSlot,
    events: broadcast::Sender<ClientEvent>,
    event_capacity: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerLinkClient {
    /// Build the engine on top of `relay` and start both pumps
    ///
    /// Must be called from within a tokio runtime. The relay may be connected
    /// before or after this call.
    pub fn new(
        config: PeerLinkConfig,
        relay: Arc<dyn RelayTransport>,
        backend: Arc<dyn PeerBackend>,
    ) -> Result<Self> {
        let event_capacity = config.event_capacity;
        let engine = NegotiationEngine::new(config, relay.clone(), backend)?;

        let chat = Arc::new(ChatLog::new());
        let name = Arc::new(RwLock::new(None));
        let annotation: AnnotationSlot = Arc::new(RwLock::new(None));
        let (events, _) = broadcast::channel(event_capacity);

        // Subscribe before spawning so nothing sent in between is missed
        let relay_rx = relay.subscribe();
        let engine_rx = engine.subscribe();

        let tasks = vec![
            tokio::spawn(Self::relay_pump(
                relay_rx,
                engine.clone(),
                chat.clone(),
                name.clone(),
                events.clone(),
            )),
            tokio::spawn(Self::engine_pump(
                engine_rx,
                chat.clone(),
                annotation.clone(),
                events.clone(),
            )),
        ];

        Ok(Self {
            relay,
            engine,
            chat,
            name,
            annotation,
            events,
            event_capacity,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    pub fn chat_log(&self) -> &Arc<ChatLog> {
        &self.chat
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Ask the relay for a display name; the answer arrives as
    /// [`ClientEvent::Registered`]
    pub async fn register(&self, name: &str) -> Result<()> {
        self.relay.register(name).await
    }

    /// Name confirmed by the relay, `None` until then or after a rejection
    pub fn registered_name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Call `peer`, or with `None` wait for an incoming offer
    pub async fn call(&self, peer: Option<&str>) -> Result<()> {
        self.engine.start(peer).await
    }

    pub async fn hang_up(&self) {
        self.engine.hang_up().await
    }

    /// Grab camera or screen for the next call
    pub async fn acquire_media(
        &self,
        source: &dyn MediaSource,
        kind: CaptureKind,
        constraints: MediaConstraints,
    ) -> MediaCapability {
        self.engine.acquire_media(source, kind, constraints).await
    }

    /// Send chat text, over the data channel when it is ready and through
    /// the relay otherwise
    ///
    /// Returns the path the message took.
    pub async fn send_message(&self, to: &str, text: &str) -> Result<ChatVia> {
        if self.engine.is_channel_ready() {
            match self.engine.send_chat(text).await {
                Ok(()) => return Ok(ChatVia::Channel),
                Err(Error::ChannelNotReady(reason)) => {
                    debug!(reason = %reason, "Channel closed under us, using the relay");
                }
                Err(e) => return Err(e),
            }
        }

        if to.is_empty() {
            return Err(Error::MissingRecipient(
                "data channel not ready and no relay recipient given".to_string(),
            ));
        }

        self.relay.communicate(to, text).await?;
        Ok(ChatVia::Relay)
    }

    /// Install an annotation transport fed by the protocol stream
    ///
    /// Replaces (and disconnects) any previous one.
    pub fn attach_annotation(&self, mode: AnnotationMode) -> Arc<AnnotationTransport> {
        let transport = Arc::new(AnnotationTransport::new(
            mode,
            self.engine.clone(),
            self.event_capacity,
        ));
        if let Some(previous) = self.annotation.write().replace(transport.clone()) {
            previous.disconnect();
        }
        info!(?mode, "Annotation transport attached");
        transport
    }

    pub fn detach_annotation(&self) {
        if let Some(previous) = self.annotation.write().take() {
            previous.disconnect();
            info!("Annotation transport detached");
        }
    }

    pub fn annotation(&self) -> Option<Arc<AnnotationTransport>> {
        self.annotation.read().clone()
    }

    async fn relay_pump(
        mut rx: broadcast::Receiver<RelayEvent>,
        engine: Arc<NegotiationEngine>,
        chat: Arc<ChatLog>,
        name: Arc<RwLock<Option<String>>>,
        events: broadcast::Sender<ClientEvent>,
    ) {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Relay pump lagged, events lost");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                RelayEvent::Registered(outcome) => {
                    *name.write() = if outcome.result {
                        outcome.name.clone()
                    } else {
                        None
                    };
                    let _ = events.send(ClientEvent::Registered(outcome));
                }
                RelayEvent::Message(message) => {
                    debug!(from = %message.from, "Relay message: {}", message.message);
                    match engine.handle_relay_message(&message).await {
                        InboundOutcome::NotSignal => {
                            let entry = ChatMessage::new(message.from, message.message, ChatVia::Relay);
                            chat.push(entry.clone());
                            let _ = events.send(ClientEvent::Chat(entry));
                        }
                        outcome => trace!(?outcome, "Signal handled"),
                    }
                }
                RelayEvent::Closed => {
                    warn!("Relay connection closed");
                    let _ = events.send(ClientEvent::RelayClosed);
                }
            }
        }

        debug!("Relay pump terminated");
    }

    async fn engine_pump(
        mut rx: broadcast::Receiver<EngineNotification>,
        chat: Arc<ChatLog>,
        annotation: AnnotationSlot,
        events: broadcast::Sender<ClientEvent>,
    ) {
        loop {
            let notification = match rx.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Engine pump lagged, notifications lost");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let forwarded = match notification {
                EngineNotification::ChatReceived(message) => {
                    chat.push(message.clone());
                    ClientEvent::Chat(message)
                }
                EngineNotification::ProtocolReceived { from, payload } => {
                    let transport = annotation.read().clone();
                    match transport {
                        Some(transport) => {
                            transport.on_message(&payload);
                        }
                        None => debug!(from = %from, "Protocol payload without annotation transport"),
                    }
                    continue;
                }
                EngineNotification::StateChanged { to, .. } => ClientEvent::State(to),
                EngineNotification::ChannelReady(ready) => ClientEvent::ChannelReady(ready),
                EngineNotification::NegotiationFailed(failure) => {
                    ClientEvent::NegotiationFailed(failure)
                }
                EngineNotification::RemoteTrack(track) => ClientEvent::RemoteTrack(track),
            };

            let _ = events.send(forwarded);
        }

        debug!("Engine pump terminated");
    }
}

impl Drop for PeerLinkClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LoopbackNetwork, LoopbackRelayHub};
    use std::time::Duration;

    fn config() -> PeerLinkConfig {
        PeerLinkConfig::with_relay("ws://loopback.test")
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_registration_records_name() {
        let hub = LoopbackRelayHub::new();
        let network = LoopbackNetwork::new();
        let client = PeerLinkClient::new(config(), hub.connect(), network.backend()).unwrap();
        let mut events = client.subscribe();

        client.register("alice").await.unwrap();

        let event = next_matching(&mut events, |e| matches!(e, ClientEvent::Registered(_))).await;
        assert_eq!(
            event,
            ClientEvent::Registered(RegistrationOutcome {
                result: true,
                name: Some("alice".to_string()),
            })
        );
        assert_eq!(client.registered_name().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_send_without_channel_uses_relay() {
        let hub = LoopbackRelayHub::new();
        let network = LoopbackNetwork::new();
        let alice = PeerLinkClient::new(config(), hub.connect(), network.backend()).unwrap();
        let bob = PeerLinkClient::new(config(), hub.connect(), network.backend()).unwrap();
        let mut bob_events = bob.subscribe();

        alice.register("alice").await.unwrap();
        bob.register("bob").await.unwrap();

        let via = alice.send_message("bob", "hello over relay").await.unwrap();
        assert_eq!(via, ChatVia::Relay);

        let event = next_matching(&mut bob_events, |e| matches!(e, ClientEvent::Chat(_))).await;
        assert_eq!(
            event,
            ClientEvent::Chat(ChatMessage::new("alice", "hello over relay", ChatVia::Relay))
        );
        assert_eq!(bob.chat_log().len(), 1);
        assert!(alice.chat_log().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_channel_or_recipient_fails() {
        let hub = LoopbackRelayHub::new();
        let client =
            PeerLinkClient::new(config(), hub.connect(), LoopbackNetwork::new().backend()).unwrap();

        let err = client.send_message("", "hi").await.unwrap_err();
        assert!(matches!(err, Error::MissingRecipient(_)));
        assert!(!err.is_transport_not_ready());
    }

    #[tokio::test]
    async fn test_attach_annotation_replaces_previous() {
        let hub = LoopbackRelayHub::new();
        let client =
            PeerLinkClient::new(config(), hub.connect(), LoopbackNetwork::new().backend()).unwrap();

        let first = client.attach_annotation(AnnotationMode::Host);
        first.connect();
        let second = client.attach_annotation(AnnotationMode::Client);

        assert!(!first.is_connected());
        assert_eq!(client.annotation().unwrap().mode(), second.mode());

        client.detach_annotation();
        assert!(client.annotation().is_none());
    }
}
