//! Loopback relay: name registry and message routing in one process

use crate::signaling::{RegistrationOutcome, RelayEvent, RelayMessage, RelayTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

struct ClientSlot {
    name: Option<String>,
    connected: bool,
    events: broadcast::Sender<RelayEvent>,
}

#[derive(Default)]
struct HubState {
    next_client: u64,
    clients: HashMap<u64, ClientSlot>,
    routed: Vec<RelayMessage>,
    echo: bool,
}

/// Shared relay all loopback clients talk through
#[derive(Clone, Default)]
pub struct LoopbackRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub that also hands every routed message back to its sender
    pub fn with_echo() -> Self {
        let hub = Self::new();
        hub.state.lock().echo = true;
        hub
    }

    /// Attach a new, already connected client
    pub fn connect(&self) -> Arc<LoopbackRelay> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = self.state.lock();
        state.next_client += 1;
        let id = state.next_client;
        state.clients.insert(
            id,
            ClientSlot {
                name: None,
                connected: true,
                events: events.clone(),
            },
        );

        Arc::new(LoopbackRelay {
            id,
            state: self.state.clone(),
            events,
        })
    }

    /// Every message routed so far, `to` filled in
    pub fn routed(&self) -> Vec<RelayMessage> {
        self.state.lock().routed.clone()
    }
}

/// One client connection to a [`LoopbackRelayHub`]
pub struct LoopbackRelay {
    id: u64,
    state: Arc<Mutex<HubState>>,
    events: broadcast::Sender<RelayEvent>,
}

impl LoopbackRelay {
    /// Drop the connection; later sends fail and subscribers see `Closed`
    pub fn disconnect(&self) {
        if let Some(slot) = self.state.lock().clients.get_mut(&self.id) {
            slot.connected = false;
            slot.name = None;
        }
        let _ = self.events.send(RelayEvent::Closed);
    }

    fn not_connected() -> Error {
        Error::NotConnected("loopback relay connection closed".to_string())
    }
}

#[async_trait]
impl RelayTransport for LoopbackRelay {
    async fn register(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.clients.get(&self.id).is_some_and(|s| s.connected) {
            return Err(Self::not_connected());
        }

        let taken = state
            .clients
            .iter()
            .any(|(id, s)| *id != self.id && s.connected && s.name.as_deref() == Some(name));

        let outcome = if taken {
            RegistrationOutcome {
                result: false,
                name: None,
            }
        } else {
            if let Some(slot) = state.clients.get_mut(&self.id) {
                slot.name = Some(name.to_string());
            }
            RegistrationOutcome {
                result: true,
                name: Some(name.to_string()),
            }
        };

        let _ = self.events.send(RelayEvent::Registered(outcome));
        Ok(())
    }

    async fn communicate(&self, to: &str, message: &str) -> Result<()> {
        let mut state = self.state.lock();
        let from = match state.clients.get(&self.id) {
            Some(slot) if slot.connected => slot.name.clone().unwrap_or_default(),
            _ => return Err(Self::not_connected()),
        };

        state.routed.push(RelayMessage {
            from: from.clone(),
            to: Some(to.to_string()),
            message: message.to_string(),
        });

        let delivered = RelayMessage::new(from, message);
        let target = state
            .clients
            .iter()
            .find(|(_, s)| s.connected && s.name.as_deref() == Some(to))
            .map(|(id, s)| (*id, s.events.clone()));

        match &target {
            Some((_, events)) => {
                let _ = events.send(RelayEvent::Message(delivered.clone()));
            }
            None => trace!(to, "Loopback relay dropped message for unknown name"),
        }

        if state.echo && target.map(|(id, _)| id) != Some(self.id) {
            let _ = self.events.send(RelayEvent::Message(delivered));
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state
            .lock()
            .clients
            .get(&self.id)
            .is_some_and(|s| s.connected)
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}
