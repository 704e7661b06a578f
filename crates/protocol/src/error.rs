//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering decoding and encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message was not valid JSON, or did not match any known shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The message carried a `type` this side does not understand.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Failed to serialize an outgoing message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A payload for a named IPC channel could not be decoded.
    #[error("invalid payload for {channel}: {reason}")]
    InvalidPayload {
        /// The channel the payload was sent on.
        channel: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns true if the error indicates the peer sent something we cannot parse at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}

/// Result type alias using [`ProtocolError`].
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownType("teleport".to_string());
        assert_eq!(err.to_string(), "unknown message type: teleport");

        let err = ProtocolError::InvalidPayload {
            channel: "pty:resize".to_string(),
            reason: "missing field `cols`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid payload for pty:resize: missing field `cols`"
        );
    }

    #[test]
    fn test_is_malformed() {
        assert!(ProtocolError::Malformed("eof".to_string()).is_malformed());
        assert!(!ProtocolError::UnknownType("x".to_string()).is_malformed());
    }
}
