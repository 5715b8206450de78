//! Relay transport seam
//!
//! The negotiation engine and the client façade only see this trait, so a
//! WebSocket relay and the in-process loopback relay are interchangeable.

use super::protocol::RelayEvent;
use crate::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Connection to a name-routing message relay
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Claim `name`; the answer arrives as [`RelayEvent::Registered`]
    async fn register(&self, name: &str) -> Result<()>;

    /// Route `message` to the peer registered as `to`
    ///
    /// Returns [`crate::Error::NotConnected`] instead of dropping the message
    /// when the relay is unusable.
    async fn communicate(&self, to: &str, message: &str) -> Result<()>;

    /// Whether sends can currently be attempted
    fn is_connected(&self) -> bool;

    /// New independent listener for inbound relay events
    fn subscribe(&self) -> broadcast::Receiver<RelayEvent>;
}
