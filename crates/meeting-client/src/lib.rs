//! Meeting Client Library
//!
//! Reconnecting client for the meeting broadcast push channel.
//!
//! ```rust,ignore
//! let client = ReconnectingClient::new(ClientConfig::new("ws://localhost:8080/ws"))?;
//! let mut events = client.subscribe();
//! client.connect("meeting-123", "participant-7").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Message(message) = event {
//!         println!("{}: {}", message.participant_name, message.content);
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`machine`] - Pure reconnect state machine (states, inputs, effects)
//! - [`client`] - Actor driver and the [`ReconnectingClient`] handle
//! - [`connector`] - Transport seam and the WebSocket connector
//! - [`errors`] - Error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod connector;
pub mod errors;
pub mod machine;

pub use client::{ClientConfig, ClientEvent, ReconnectingClient};
pub use connector::{ChannelHandle, Connector, InboundEvent, WebSocketConnector};
pub use errors::ClientError;
pub use machine::{FailureReason, RetryPolicy, SessionState};
