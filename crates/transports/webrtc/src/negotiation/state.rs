//! Negotiation state machine

use serde::{Deserialize, Serialize};

/// Per-call negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// No call in progress
    Idle,
    /// Local offer created and sent, waiting for the answer
    Offering,
    /// Remote offer received, producing the answer
    Answering,
    /// Both descriptions set; candidates may still trickle
    Connected,
    /// Both data channel legs open
    ChannelOpen,
    /// Torn down, about to return to Idle
    Closed,
}

impl NegotiationState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;

        matches!(
            (self, next),
            (Idle, Offering)
                | (Idle, Answering)
                | (Idle, Closed)
                | (Offering, Connected)
                | (Offering, Closed)
                | (Answering, Connected)
                | (Answering, Closed)
                | (Connected, ChannelOpen)
                | (Connected, Closed)
                | (ChannelOpen, Closed)
                | (Closed, Idle)
        )
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Answering => "answering",
            NegotiationState::Connected => "connected",
            NegotiationState::ChannelOpen => "channel-open",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Side of the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Caller,
    Answerer,
}
