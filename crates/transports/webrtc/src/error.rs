//! Error types for relay signaling and peer negotiation

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or messaging
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Relay connection is missing or was lost
    #[error("Relay not connected: {0}")]
    NotConnected(String),

    /// Data channel legs are not both open yet
    #[error("Data channel not ready: {0}")]
    ChannelNotReady(String),

    /// Relay message with no one to route it to
    #[error("No recipient: {0}")]
    MissingRecipient(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Negotiation envelope that cannot be interpreted
    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Waiting for a negotiation milestone timed out
    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    /// Media track or capture error
    #[error("Media error: {0}")]
    MediaError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl Error {
    /// Operation attempted before the relay or the data channel was usable
    pub fn is_transport_not_ready(&self) -> bool {
        matches!(self, Error::NotConnected(_) | Error::ChannelNotReady(_))
    }

    /// Rejection by the SDP/ICE engine; the call can be restarted
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::PeerConnectionError(_)
                | Error::WebRtcError(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected(_)
                | Error::ChannelNotReady(_)
                | Error::WebSocketError(_)
                | Error::OperationTimeout(_)
                | Error::IoError(_)
        ) || self.is_negotiation_failure()
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
