//! Client error types.

use thiserror::Error;

/// Errors surfaced by the meeting client, either as return values or as
/// [`crate::ClientEvent::Error`] events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The server URL could not be parsed.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// The channel did not open within the connect timeout.
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// The channel closed with anything other than a normal close.
    #[error("Connection closed abnormally (code {code:?})")]
    AbnormalClose { code: Option<u16> },

    /// Reconnection gave up. Terminal until the next explicit `connect()`.
    #[error("Gave up reconnecting after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// The transport refused or failed the connection attempt.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// `send` was called while the channel is not open.
    #[error("Channel is not open")]
    NotOpen,

    /// An inbound frame did not match the wire schema.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The client's background task has stopped.
    #[error("Client is closed")]
    Closed,
}
