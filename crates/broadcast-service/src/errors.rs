//! Broadcast service error types.
//!
//! Internal details are logged server-side; [`BsError::client_message`] is the
//! only text that may reach a client (e.g. as a WebSocket close reason).

use thiserror::Error;

/// Broadcast service error type.
#[derive(Debug, Error)]
pub enum BsError {
    /// Registry storage operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// A change-feed record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Wire frame could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid handshake parameters.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BsError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            BsError::Redis(_)
            | BsError::Decode(_)
            | BsError::Encode(_)
            | BsError::Config(_)
            | BsError::Internal(_) => "An internal error occurred".to_string(),
            BsError::InvalidHandshake(msg) => msg.clone(),
        }
    }

    /// Whether a retry of the same operation may succeed.
    ///
    /// The feed consumer uses this to decide how loudly to log a failed entry;
    /// both kinds are left pending for redelivery.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, BsError::Redis(_) | BsError::Internal(_))
    }
}

impl From<common::wire::WireError> for BsError {
    fn from(err: common::wire::WireError) -> Self {
        BsError::Encode(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let redis_err = BsError::Redis("connection refused at 10.0.0.12:6379".to_string());
        assert!(!redis_err.client_message().contains("10.0.0.12"));
        assert_eq!(redis_err.client_message(), "An internal error occurred");

        let decode_err = BsError::Decode("missing field `meetingId`".to_string());
        assert_eq!(decode_err.client_message(), "An internal error occurred");

        let handshake = BsError::InvalidHandshake("meetingId is required".to_string());
        assert_eq!(handshake.client_message(), "meetingId is required");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BsError::Redis("timeout".to_string()).is_retryable());
        assert!(BsError::Internal("join".to_string()).is_retryable());
        assert!(!BsError::Decode("bad".to_string()).is_retryable());
        assert!(!BsError::Config("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", BsError::Redis("timeout".to_string())),
            "Redis error: timeout"
        );
        assert_eq!(
            format!("{}", BsError::Decode("missing field".to_string())),
            "Decode error: missing field"
        );
    }

    #[test]
    fn test_wire_error_conversion() {
        let err: BsError = common::wire::WireError::Encode("boom".to_string()).into();
        assert!(matches!(err, BsError::Encode(ref m) if m.contains("boom")));
    }
}
