//! Relay signaling: wire codec, negotiation envelope and relay client
//!
//! The relay is an opaque message broker. Peers register a display name and
//! route strings to each other by name; before a direct data channel exists
//! the same stream carries both negotiation envelopes and chat text.

pub mod client;
pub mod envelope;
pub mod protocol;
pub mod transport;

pub use client::RelayClient;
pub use envelope::{
    Classified, IceCandidate, SdpKind, SessionDescription, SignalEnvelope, SignalPayload,
};
pub use protocol::{RegistrationOutcome, RelayEvent, RelayMessage, RelayRequest};
pub use transport::RelayTransport;
