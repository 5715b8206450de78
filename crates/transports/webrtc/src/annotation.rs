//! Transport for the embedded annotation protocol
//!
//! The annotation library (host/client pointer and drawing sync) is an
//! external collaborator. This module only provides the transport contract it
//! expects: `handshake`, `connect`, `disconnect`, `publish` and an inbound
//! message hook, tunnelled through the protocol stream of the data channel.

use crate::negotiation::NegotiationEngine;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Which side of the annotation session this peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationMode {
    /// Owns the annotated surface
    Host,
    /// Drives the host's surface remotely
    Client,
}

/// Events delivered to the annotation library
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect,
    Action(serde_json::Value),
}

/// Outlet for protocol payloads
#[async_trait]
pub trait ProtocolSender: Send + Sync {
    async fn send_protocol(&self, payload: &str) -> Result<()>;
}

#[async_trait]
impl ProtocolSender for NegotiationEngine {
    async fn send_protocol(&self, payload: &str) -> Result<()> {
        NegotiationEngine::send_protocol(self, payload).await
    }
}

/// Annotation-protocol transport over the data channel
pub struct AnnotationTransport {
    mode: AnnotationMode,
    connected: AtomicBool,
    /// Cleared by `disconnect`; inbound messages are ignored meanwhile
    listening: AtomicBool,
    sender: Arc<dyn ProtocolSender>,
    events: broadcast::Sender<TransportEvent>,
}

impl AnnotationTransport {
    pub fn new(mode: AnnotationMode, sender: Arc<dyn ProtocolSender>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            mode,
            connected: AtomicBool::new(false),
            listening: AtomicBool::new(true),
            sender,
            events,
        }
    }

    pub fn mode(&self) -> AnnotationMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Announce the connection, connecting first if needed
    pub fn handshake(&self) {
        if self.is_connected() {
            let _ = self.events.send(TransportEvent::Connect);
        } else {
            self.connect();
        }
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.listening.store(true, Ordering::SeqCst);
        debug!(mode = ?self.mode, "Annotation transport connected");
        let _ = self.events.send(TransportEvent::Connect);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
        debug!(mode = ?self.mode, "Annotation transport disconnected");
    }

    /// Send one protocol action to the remote peer
    pub async fn publish(&self, action: &serde_json::Value) -> Result<()> {
        self.sender.send_protocol(&action.to_string()).await
    }

    /// Feed one inbound protocol payload; returns the decoded action
    pub fn on_message(&self, raw: &str) -> Option<serde_json::Value> {
        if !self.listening.load(Ordering::SeqCst) {
            return None;
        }

        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(action) => {
                let _ = self.events.send(TransportEvent::Action(action.clone()));
                Some(action)
            }
            Err(e) => {
                warn!("Ignoring undecodable annotation message: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProtocolSender for Recorder {
        async fn send_protocol(&self, payload: &str) -> Result<()> {
            self.sent.lock().push(payload.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_serializes_action() {
        let recorder = Arc::new(Recorder::default());
        let transport = AnnotationTransport::new(AnnotationMode::Host, recorder.clone(), 8);

        transport
            .publish(&json!({"type": "click", "x": 10, "y": 20}))
            .await
            .unwrap();

        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(value["type"], "click");
    }

    #[test]
    fn test_handshake_connects_once() {
        let transport =
            AnnotationTransport::new(AnnotationMode::Client, Arc::new(Recorder::default()), 8);
        let mut rx = transport.subscribe();

        transport.handshake();
        assert!(transport.is_connected());
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connect);

        transport.handshake();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connect);
    }

    #[test]
    fn test_on_message_respects_disconnect() {
        let transport =
            AnnotationTransport::new(AnnotationMode::Host, Arc::new(Recorder::default()), 8);
        let mut rx = transport.subscribe();

        assert_eq!(transport.on_message(r#"{"type":"move"}"#), Some(json!({"type": "move"})));
        assert!(matches!(rx.try_recv().unwrap(), TransportEvent::Action(_)));

        assert!(transport.on_message("not json").is_none());

        transport.disconnect();
        assert!(transport.on_message(r#"{"type":"move"}"#).is_none());
        assert!(rx.try_recv().is_err());
    }
}
