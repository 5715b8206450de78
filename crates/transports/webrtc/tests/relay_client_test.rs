//! RelayClient against an in-process WebSocket relay

use futures::{SinkExt, StreamExt};
use peerlink_webrtc::signaling::protocol::{CommandPayload, RegistrationOutcome};
use peerlink_webrtc::signaling::{RelayClient, RelayEvent, RelayMessage, RelayRequest, RelayTransport};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal relay: confirms every registration, echoes `communicate` back to
/// the sender, and hangs up on the message "bye"
async fn spawn_relay() -> (String, JoinHandle<Vec<RelayRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut received = Vec::new();

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let request = RelayRequest::from_json(&text).unwrap();
            received.push(request.clone());

            let reply = match request.data.payload {
                CommandPayload::Name(name) => RelayEvent::Registered(RegistrationOutcome {
                    result: true,
                    name: Some(name),
                }),
                CommandPayload::Communicate(payload) if payload.message == "bye" => {
                    let _ = ws.close(None).await;
                    break;
                }
                CommandPayload::Communicate(payload) => RelayEvent::Message(RelayMessage::new(
                    request.data.from.unwrap_or_default(),
                    payload.message,
                )),
            };
            ws.send(Message::Text(reply.encode_frame().unwrap()))
                .await
                .unwrap();
        }

        received
    });

    (format!("ws://{}", addr), handle)
}

async fn next_event(rx: &mut broadcast::Receiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("relay event timed out")
        .unwrap()
}

#[tokio::test]
async fn test_register_and_communicate_round_trip() {
    let (url, server) = spawn_relay().await;
    let client = RelayClient::new(&url, 32);
    let mut events = client.subscribe();
    // A second, independent listener sees the same events
    let mut other = client.subscribe();

    client.connect().await.unwrap();
    assert!(client.is_connected());

    client.register("alice").await.unwrap();
    let expected = RelayEvent::Registered(RegistrationOutcome {
        result: true,
        name: Some("alice".to_string()),
    });
    assert_eq!(next_event(&mut events).await, expected);
    assert_eq!(next_event(&mut other).await, expected);
    assert_eq!(client.registered_name().as_deref(), Some("alice"));

    client.communicate("alice", "ping").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Message(RelayMessage::new("alice", "ping"))
    );

    client.communicate("alice", "bye").await.unwrap();
    assert_eq!(next_event(&mut events).await, RelayEvent::Closed);
    assert!(!client.is_connected());

    let err = client.communicate("alice", "late").await.unwrap_err();
    assert!(err.is_transport_not_ready());

    let received = server.await.unwrap();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].data.from, None);
    assert_eq!(received[1].data.from.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_connect_to_missing_relay_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RelayClient::new(&format!("ws://{}", addr), 32);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, peerlink_webrtc::Error::WebSocketError(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_disconnect_stops_sending() {
    let (url, server) = spawn_relay().await;
    let client = RelayClient::new(&url, 32);
    let mut events = client.subscribe();

    client.connect().await.unwrap();
    client.disconnect();
    assert!(!client.is_connected());
    assert!(client.register("alice").await.is_err());

    assert_eq!(next_event(&mut events).await, RelayEvent::Closed);
    assert!(server.await.unwrap().is_empty());
}
