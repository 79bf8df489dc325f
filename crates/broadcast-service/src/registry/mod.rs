//! Connection registry: which push-channel connections are live for a meeting.
//!
//! A [`ConnectionRecord`] is written when a client connects and flipped to
//! inactive when it disconnects. Records are never reactivated: a client that
//! drops and rejoins arrives with a new connection ID and gets a new record.
//! Nothing in this subsystem deletes records.
//!
//! # Backends
//!
//! - [`RedisConnectionRegistry`] - shared registry for multi-instance deployments
//! - [`MemoryConnectionRegistry`] - process-local registry for a single instance
//!
//! Both serve [`ConnectionRegistry::list_active`] from a per-meeting index of
//! active connection IDs, never by scanning all records.

pub mod lua_scripts;
pub mod memory;
pub mod redis;

use crate::errors::BsError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use self::memory::MemoryConnectionRegistry;
pub use self::redis::RedisConnectionRegistry;

/// One push-channel connection and the meeting/participant it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Opaque transport identifier; unique and immutable.
    pub connection_id: String,
    pub meeting_id: String,
    pub participant_id: String,
    pub connected_at: DateTime<Utc>,
    /// Only ever transitions true -> false.
    pub active: bool,
}

impl ConnectionRecord {
    /// Build an active record connected now.
    #[must_use]
    pub fn new_active(
        connection_id: impl Into<String>,
        meeting_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            meeting_id: meeting_id.into(),
            participant_id: participant_id.into(),
            connected_at: Utc::now(),
            active: true,
        }
    }
}

/// Durable mapping from connection ID to meeting/participant.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Idempotent upsert keyed by `connection_id`.
    ///
    /// # Errors
    ///
    /// Storage errors propagate to the caller.
    async fn save(&self, record: &ConnectionRecord) -> Result<(), BsError>;

    /// All records for `meeting_id` with `active = true`.
    ///
    /// # Errors
    ///
    /// Storage errors propagate to the caller.
    async fn list_active(&self, meeting_id: &str) -> Result<Vec<ConnectionRecord>, BsError>;

    /// Mark a connection inactive.
    ///
    /// Returns `false` for an unknown ID and for any storage failure; never
    /// errors, because the transport session it belongs to is already gone.
    async fn deactivate(&self, connection_id: &str) -> bool;
}
