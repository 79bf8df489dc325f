//! # BS Test Utilities
//!
//! Shared test utilities for the Meeting Broadcast Service.
//!
//! ## Modules
//!
//! - `mock_transport` - Recording [`PushTransport`] with scripted per-connection outcomes
//! - `mock_registry` - Registry that fails on demand, for error-path tests
//! - `fixtures` - Message images, feed records and connection records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bs_test_utils::*;
//!
//! let transport = MockPushTransport::new().with_gone("c2");
//! let gateway = BroadcastGateway::new(transport.clone(), Duration::from_secs(1));
//!
//! let delivered = gateway.push_many(&ids(["c1", "c2"]), payload("x")).await;
//! assert_eq!(delivered, 1);
//! assert_eq!(transport.attempts().len(), 2);
//! ```
//!
//! [`PushTransport`]: broadcast_service::gateway::PushTransport

pub mod fixtures;
pub mod mock_registry;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_registry::*;
pub use mock_transport::*;
