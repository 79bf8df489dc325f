//! Process-local connection registry.
//!
//! Suitable when a single broadcast instance owns every WebSocket session.
//! Keeps the same secondary index shape as the Redis backend: meeting ID to
//! the set of its active connection IDs.

use super::{ConnectionRecord, ConnectionRegistry};
use crate::errors::BsError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, ConnectionRecord>,
    /// meeting_id -> active connection IDs
    active_by_meeting: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn unindex(&mut self, meeting_id: &str, connection_id: &str) {
        if let Some(ids) = self.active_by_meeting.get_mut(meeting_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                self.active_by_meeting.remove(meeting_id);
            }
        }
    }
}

/// In-memory [`ConnectionRegistry`].
#[derive(Debug, Default)]
pub struct MemoryConnectionRegistry {
    inner: RwLock<Inner>,
}

impl MemoryConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, active or not.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether the registry holds no records.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Fetch one record by connection ID.
    pub async fn get(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.inner.read().await.records.get(connection_id).cloned()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    async fn save(&self, record: &ConnectionRecord) -> Result<(), BsError> {
        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.records.get(&record.connection_id) {
            let previous_meeting = previous.meeting_id.clone();
            inner.unindex(&previous_meeting, &record.connection_id);
        }

        if record.active {
            inner
                .active_by_meeting
                .entry(record.meeting_id.clone())
                .or_default()
                .insert(record.connection_id.clone());
        }

        inner
            .records
            .insert(record.connection_id.clone(), record.clone());

        debug!(
            target: "bs.registry.memory",
            connection_id = %record.connection_id,
            meeting_id = %record.meeting_id,
            active = record.active,
            "Saved connection record"
        );

        Ok(())
    }

    async fn list_active(&self, meeting_id: &str) -> Result<Vec<ConnectionRecord>, BsError> {
        let inner = self.inner.read().await;

        let Some(ids) = inner.active_by_meeting.get(meeting_id) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.active && record.meeting_id == meeting_id)
            .cloned()
            .collect())
    }

    async fn deactivate(&self, connection_id: &str) -> bool {
        let mut inner = self.inner.write().await;

        let Some(record) = inner.records.get_mut(connection_id) else {
            debug!(
                target: "bs.registry.memory",
                connection_id = %connection_id,
                "Deactivate for unknown connection"
            );
            return false;
        };

        record.active = false;
        let meeting_id = record.meeting_id.clone();
        inner.unindex(&meeting_id, connection_id);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ids(records: &[ConnectionRecord]) -> Vec<String> {
        let mut ids: Vec<String> = records.iter().map(|r| r.connection_id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_list_active_filters_meeting_and_active_flag() {
        let registry = MemoryConnectionRegistry::new();
        registry
            .save(&ConnectionRecord::new_active("c1", "m1", "p1"))
            .await
            .unwrap();
        registry
            .save(&ConnectionRecord::new_active("c2", "m1", "p2"))
            .await
            .unwrap();
        registry
            .save(&ConnectionRecord::new_active("c3", "m2", "p3"))
            .await
            .unwrap();

        assert!(registry.deactivate("c2").await);

        let m1 = registry.list_active("m1").await.unwrap();
        assert_eq!(ids(&m1), vec!["c1".to_string()]);

        let m2 = registry.list_active("m2").await.unwrap();
        assert_eq!(ids(&m2), vec!["c3".to_string()]);

        assert!(registry.list_active("m-none").await.unwrap().is_empty());
        assert_eq!(registry.len().await, 3, "Deactivation never deletes");
    }

    #[tokio::test]
    async fn test_deactivate_unknown_returns_false() {
        let registry = MemoryConnectionRegistry::new();
        assert!(!registry.deactivate("missing").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deactivate_is_repeatable() {
        let registry = MemoryConnectionRegistry::new();
        registry
            .save(&ConnectionRecord::new_active("c1", "m1", "p1"))
            .await
            .unwrap();

        assert!(registry.deactivate("c1").await);
        // Record still exists, so a second deactivate reports success.
        assert!(registry.deactivate("c1").await);
        assert!(!registry.get("c1").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_save_is_idempotent_upsert() {
        let registry = MemoryConnectionRegistry::new();
        let record = ConnectionRecord::new_active("c1", "m1", "p1");

        registry.save(&record).await.unwrap();
        registry.save(&record).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.list_active("m1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_moves_index_when_meeting_changes() {
        let registry = MemoryConnectionRegistry::new();
        registry
            .save(&ConnectionRecord::new_active("c1", "m1", "p1"))
            .await
            .unwrap();
        registry
            .save(&ConnectionRecord::new_active("c1", "m2", "p1"))
            .await
            .unwrap();

        assert!(registry.list_active("m1").await.unwrap().is_empty());
        assert_eq!(registry.list_active("m2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_inactive_record_is_not_indexed() {
        let registry = MemoryConnectionRegistry::new();
        let mut record = ConnectionRecord::new_active("c1", "m1", "p1");
        record.active = false;

        registry.save(&record).await.unwrap();

        assert!(registry.list_active("m1").await.unwrap().is_empty());
        assert_eq!(registry.len().await, 1);
    }
}
