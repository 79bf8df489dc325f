//! Meeting Broadcast Service Library
//!
//! Real-time fan-out of newly persisted meeting messages to every participant
//! currently connected to that meeting.
//!
//! # Architecture
//!
//! ```text
//! client ──ws──> ws::run_session ──> ConnectionLifecycleHandler ──> ConnectionRegistry
//!                     │                                                   ▲
//!                     └── ConnectionHub <── BroadcastGateway <── ChangeFeedTrigger
//!                                                                         ▲
//!                                            FeedConsumer (Redis Streams) ┘
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Connection records and the per-meeting active index
//! - [`gateway`] - Push transport and concurrent fan-out
//! - [`lifecycle`] - Connect/disconnect handling
//! - [`feed`] - Change-feed decoding, trigger and consumer
//! - [`ws`] - WebSocket push channel
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics and health endpoints

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod feed;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod ws;
