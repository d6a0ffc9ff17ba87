//! Shared error types for Relayline.
//!
//! Dispatch itself never fails: anomalies on the inbound path are logged and
//! dropped. These types cover the places where a caller can observe a
//! failure.

use thiserror::Error;

/// Errors from the transport and codec layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: u32 },
}

/// Outcome delivered to a pending-response handler that did not receive a
/// matching response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No response arrived before the request deadline.
    #[error("Request {0} timed out")]
    Timeout(String),

    /// The peer the request was sent to disconnected first.
    #[error("Peer {0} disconnected before responding")]
    PeerDisconnected(String),

    /// The target peer is not registered.
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    /// The frame could not be handed to the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The engine shut down while the request was outstanding.
    #[error("Engine shut down")]
    Shutdown,
}

/// Errors returned by a responder capability.
#[derive(Debug, Error)]
pub enum RespondError {
    /// The responder was already used once.
    #[error("Request {0} was already answered")]
    AlreadyResponded(String),

    /// The requesting peer is no longer registered.
    #[error("Requesting peer {0} is gone")]
    PeerGone(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RequestError::Timeout("1-a".into()).to_string(),
            "Request 1-a timed out"
        );
        assert_eq!(
            WireError::MessageTooLarge { size: 20, max: 10 }.to_string(),
            "Message too large: 20 bytes (max 10)"
        );
        let wrapped: RespondError = WireError::ConnectionClosed.into();
        assert_eq!(wrapped.to_string(), "Connection closed");
    }
}
