//! In-process test kit
//!
//! A loopback relay hub that routes by registered name and a loopback peer
//! backend that pairs connections once both sides have exchanged
//! descriptions and candidates. Compiled for unit tests and behind the
//! `test-util` feature for integration tests.

mod backend;
mod relay;

pub use backend::{FailPoint, LoopbackBackend, LoopbackChannel, LoopbackNetwork, LoopbackPeer};
pub use relay::{LoopbackRelay, LoopbackRelayHub};

use crate::negotiation::{InboundOutcome, NegotiationEngine};
use crate::signaling::{RelayEvent, RelayMessage, RelayTransport};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;

/// Feed every message `relay` receives into `engine`
///
/// Each message is reported back together with the outcome the engine
/// returned, in arrival order.
pub fn pump_relay_into_engine(
    relay: &dyn RelayTransport,
    engine: Arc<NegotiationEngine>,
) -> (
    JoinHandle<()>,
    mpsc::UnboundedReceiver<(RelayMessage, InboundOutcome)>,
) {
    let mut events = relay.subscribe();
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RelayEvent::Message(message)) => {
                    let outcome = engine.handle_relay_message(&message).await;
                    let _ = tx.send((message, outcome));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    (handle, rx)
}
