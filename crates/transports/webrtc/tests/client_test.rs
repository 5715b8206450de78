//! Client façade scenarios: relay fallback, channel chat, annotation protocol

use peerlink_webrtc::testing::{LoopbackNetwork, LoopbackRelayHub};
use peerlink_webrtc::{
    AnnotationMode, ChatMessage, ChatVia, ClientEvent, NegotiationState, PeerLinkClient,
    PeerLinkConfig, TransportEvent,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peerlink_webrtc=debug")
        .with_test_writer()
        .try_init();
}

async fn client(hub: &LoopbackRelayHub, network: &LoopbackNetwork, name: &str) -> PeerLinkClient {
    let client = PeerLinkClient::new(
        PeerLinkConfig::with_relay("ws://loopback.test"),
        hub.connect(),
        network.backend(),
    )
    .unwrap();
    let mut events = client.subscribe();

    client.register(name).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Registered(_))).await;
    assert_eq!(client.registered_name().as_deref(), Some(name));
    client
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
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

async fn ready_pair(hub: &LoopbackRelayHub, network: &LoopbackNetwork) -> (PeerLinkClient, PeerLinkClient) {
    let alice = client(hub, network, "alice").await;
    let bob = client(hub, network, "bob").await;

    alice.call(Some("bob")).await.unwrap();
    alice.engine().wait_until_ready(TIMEOUT).await.unwrap();
    bob.engine().wait_until_ready(TIMEOUT).await.unwrap();
    (alice, bob)
}

#[tokio::test]
async fn test_relay_chat_lands_in_log_before_call() {
    init_logging();

    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;
    let bob = client(&hub, &network, "bob").await;
    let mut alice_events = alice.subscribe();

    assert_eq!(bob.send_message("alice", "hi").await.unwrap(), ChatVia::Relay);

    wait_for(&mut alice_events, |e| matches!(e, ClientEvent::Chat(_))).await;
    assert_eq!(
        alice.chat_log().last(),
        Some(ChatMessage::new("bob", "hi", ChatVia::Relay))
    );
    assert_eq!(alice.engine().state(), NegotiationState::Idle);
    assert_eq!(network.total_peers(), 0);
}

#[tokio::test]
async fn test_chat_switches_to_channel_once_ready() {
    init_logging();

    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let (alice, bob) = ready_pair(&hub, &network).await;
    let mut bob_events = bob.subscribe();

    assert_eq!(
        alice.send_message("bob", "over the channel").await.unwrap(),
        ChatVia::Channel
    );

    let event = wait_for(&mut bob_events, |e| matches!(e, ClientEvent::Chat(_))).await;
    assert_eq!(
        event,
        ClientEvent::Chat(ChatMessage::new("alice", "over the channel", ChatVia::Channel))
    );

    // Signals exchanged during negotiation never reach the log
    assert_eq!(bob.chat_log().snapshot().len(), 1);
    assert!(alice.chat_log().is_empty());
}

#[tokio::test]
async fn test_hang_up_falls_back_to_relay() {
    init_logging();

    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let (alice, bob) = ready_pair(&hub, &network).await;
    let mut bob_events = bob.subscribe();

    alice.hang_up().await;
    wait_for(&mut bob_events, |e| *e == ClientEvent::ChannelReady(false)).await;

    assert_eq!(
        alice.send_message("bob", "still there?").await.unwrap(),
        ChatVia::Relay
    );
    let event = wait_for(&mut bob_events, |e| matches!(e, ClientEvent::Chat(_))).await;
    assert_eq!(
        event,
        ClientEvent::Chat(ChatMessage::new("alice", "still there?", ChatVia::Relay))
    );
}

#[tokio::test]
async fn test_leg_closed_under_a_ready_engine_falls_back_to_relay() {
    init_logging();

    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let (alice, bob) = ready_pair(&hub, &network).await;
    let mut bob_events = bob.subscribe();

    // Legs are gone before either engine has seen the close events
    network.close_channels();
    assert_eq!(
        alice.send_message("bob", "are you there?").await.unwrap(),
        ChatVia::Relay
    );

    let event = wait_for(&mut bob_events, |e| matches!(e, ClientEvent::Chat(_))).await;
    assert_eq!(
        event,
        ClientEvent::Chat(ChatMessage::new("alice", "are you there?", ChatVia::Relay))
    );
}

#[tokio::test]
async fn test_annotation_actions_cross_the_channel() {
    init_logging();

    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let (alice, bob) = ready_pair(&hub, &network).await;

    let host = alice.attach_annotation(AnnotationMode::Host);
    let remote = bob.attach_annotation(AnnotationMode::Client);
    let mut remote_events = remote.subscribe();

    remote.handshake();
    assert_eq!(remote_events.recv().await.unwrap(), TransportEvent::Connect);

    let action = json!({"type": "click", "x": 120, "y": 48});
    host.publish(&action).await.unwrap();

    let received = tokio::time::timeout(TIMEOUT, remote_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, TransportEvent::Action(action));

    // Protocol traffic is not chat
    assert!(bob.chat_log().is_empty());
}

#[tokio::test]
async fn test_rejected_registration_clears_name() {
    let hub = LoopbackRelayHub::new();
    let network = LoopbackNetwork::new();
    let _alice = client(&hub, &network, "alice").await;

    let impostor = PeerLinkClient::new(
        PeerLinkConfig::with_relay("ws://loopback.test"),
        hub.connect(),
        network.backend(),
    )
    .unwrap();
    let mut events = impostor.subscribe();

    impostor.register("alice").await.unwrap();
    match wait_for(&mut events, |e| matches!(e, ClientEvent::Registered(_))).await {
        ClientEvent::Registered(outcome) => assert!(!outcome.result),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(impostor.registered_name().is_none());
}
