//! Peer negotiation: state machine, backend seam and the engine

pub mod backend;
pub mod candidates;
pub mod engine;
pub mod state;

pub use backend::{
    ChannelDirection, ChannelHandle, PeerBackend, PeerConnectionState, PeerEvent, PeerEventSink,
    PeerHandle,
};
pub use candidates::CandidateBuffer;
pub use engine::{
    DiscardReason, EngineNotification, FailureStage, InboundOutcome, NegotiationEngine,
    NegotiationFailure,
};
pub use state::{NegotiationState, Role};
