//! Push-channel wire schema.
//!
//! Every frame the server pushes is a JSON text frame wrapped in a versioned,
//! tagged envelope:
//!
//! ```json
//! {"version": 1, "type": "message", "payload": { ... }}
//! ```
//!
//! Decoding is decode-or-reject: an unknown version, an unknown `type`, or a
//! payload that does not match the schema for its `type` is an error. There
//! is no field-by-field probing of untyped JSON.
//!
//! | `type` | Payload |
//! |--------|---------|
//! | `connected` | `{connectionId}`, sent once after the session is registered |
//! | `message` | [`BroadcastMessage`] |

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current envelope version.
pub const WIRE_VERSION: u32 = 1;

/// Frame type tag for [`ServerFrame::Connected`].
pub const FRAME_TYPE_CONNECTED: &str = "connected";

/// Frame type tag for [`ServerFrame::Message`].
pub const FRAME_TYPE_MESSAGE: &str = "message";

/// A persisted meeting message as pushed to connected participants.
///
/// The same field names are used for the change-feed image, so the feed
/// trigger decodes the image straight into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub message_id: String,
    pub meeting_id: String,
    pub participant_id: String,
    pub participant_name: String,
    pub content: String,
    /// ISO-8601 on the wire.
    pub created_at: DateTime<Utc>,
    pub like_count: i64,
    pub reported_count: i64,
    /// Accepted as `0`/`1` or a boolean; always emitted as a boolean.
    #[serde(deserialize_with = "bool_or_flag")]
    pub is_active: bool,
}

/// Frames pushed from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// The session was registered under `connection_id`.
    Connected { connection_id: String },
    /// A newly persisted message for the client's meeting.
    Message(BroadcastMessage),
}

/// Wire encode/decode errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Not valid JSON, or the payload does not match its frame type.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Envelope version this build does not understand.
    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u32),

    /// Frame `type` tag this build does not understand.
    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    /// Serialization failed.
    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    #[serde(rename = "type")]
    kind: String,
    payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedPayload {
    connection_id: String,
}

impl ServerFrame {
    /// The `type` tag used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => FRAME_TYPE_CONNECTED,
            ServerFrame::Message(_) => FRAME_TYPE_MESSAGE,
        }
    }

    /// Encode into a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Encode` if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, WireError> {
        let payload = match self {
            ServerFrame::Connected { connection_id } => serde_json::to_value(ConnectedPayload {
                connection_id: connection_id.clone(),
            }),
            ServerFrame::Message(message) => serde_json::to_value(message),
        }
        .map_err(|e| WireError::Encode(e.to_string()))?;

        serde_json::to_string(&Envelope {
            version: WIRE_VERSION,
            kind: self.kind().to_string(),
            payload,
        })
        .map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// - `WireError::Malformed` for invalid JSON or a payload mismatch
    /// - `WireError::UnsupportedVersion` for any version other than [`WIRE_VERSION`]
    /// - `WireError::UnknownType` for an unrecognized `type` tag
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| WireError::Malformed(e.to_string()))?;

        if envelope.version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(envelope.version));
        }

        match envelope.kind.as_str() {
            FRAME_TYPE_CONNECTED => {
                let payload: ConnectedPayload = serde_json::from_value(envelope.payload)
                    .map_err(|e| WireError::Malformed(e.to_string()))?;
                Ok(ServerFrame::Connected {
                    connection_id: payload.connection_id,
                })
            }
            FRAME_TYPE_MESSAGE => serde_json::from_value(envelope.payload)
                .map(ServerFrame::Message)
                .map_err(|e| WireError::Malformed(e.to_string())),
            _ => Err(WireError::UnknownType(envelope.kind)),
        }
    }
}

fn bool_or_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(de::Error::custom(format!(
            "isActive must be 0, 1 or a boolean, got {other}"
        ))),
    }
}
