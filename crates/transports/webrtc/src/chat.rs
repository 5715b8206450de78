//! Chat messages and the display log

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Path a chat message travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatVia {
    /// Routed by the relay before a direct channel existed
    Relay,
    /// Received over the peer data channel
    Channel,
}

/// Display-only chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub message: String,
    pub via: ChatVia,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, message: impl Into<String>, via: ChatVia) -> Self {
        Self {
            from: from.into(),
            message: message.into(),
            via,
        }
    }
}

/// Arrival-ordered message log, no deduplication
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: RwLock<Vec<ChatMessage>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: ChatMessage) {
        self.entries.write().push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of all entries in arrival order
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.read().clone()
    }

    pub fn last(&self) -> Option<ChatMessage> {
        self.entries.read().last().cloned()
    }
}
