//! Registry that fails on demand.
//!
//! Wraps a [`MemoryConnectionRegistry`] so the non-failing operations still
//! behave like a real registry.

use async_trait::async_trait;
use broadcast_service::errors::BsError;
use broadcast_service::registry::{
    ConnectionRecord, ConnectionRegistry, MemoryConnectionRegistry,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Registry whose `save` and `list_active` can be made to fail.
#[derive(Debug, Default)]
pub struct FailingRegistry {
    inner: MemoryConnectionRegistry,
    fail_save: AtomicBool,
    fail_list: AtomicBool,
    list_calls: AtomicUsize,
}

impl FailingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `save` returns a storage error.
    #[must_use]
    pub fn failing_saves() -> Self {
        let registry = Self::new();
        registry.fail_save.store(true, Ordering::SeqCst);
        registry
    }

    /// Every `list_active` returns a storage error.
    #[must_use]
    pub fn failing_lists() -> Self {
        let registry = Self::new();
        registry.fail_list.store(true, Ordering::SeqCst);
        registry
    }

    /// Number of `list_active` calls, failed or not.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// The backing in-memory registry.
    #[must_use]
    pub fn inner(&self) -> &MemoryConnectionRegistry {
        &self.inner
    }
}

#[async_trait]
impl ConnectionRegistry for FailingRegistry {
    async fn save(&self, record: &ConnectionRecord) -> Result<(), BsError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(BsError::Redis("registry unavailable".to_string()));
        }
        self.inner.save(record).await
    }

    async fn list_active(&self, meeting_id: &str) -> Result<Vec<ConnectionRecord>, BsError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BsError::Redis("registry unavailable".to_string()));
        }
        self.inner.list_active(meeting_id).await
    }

    async fn deactivate(&self, connection_id: &str) -> bool {
        self.inner.deactivate(connection_id).await
    }
}
