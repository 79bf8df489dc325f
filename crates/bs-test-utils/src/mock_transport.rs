//! Recording push transport.
//!
//! Every `post` is recorded. Connections answer `Ok` unless scripted as
//! gone, transient, or slow.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockPushTransport::new()
//!     .with_gone("c2")
//!     .with_transient("c3");
//!
//! assert!(transport.post("c1", payload("x")).await.is_ok());
//! assert_eq!(transport.post("c2", payload("x")).await, Err(TransportError::Gone));
//! ```

use async_trait::async_trait;
use broadcast_service::gateway::{PushTransport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behavior for one connection.
#[derive(Debug, Clone)]
enum Scripted {
    Gone,
    Transient,
    Delay(Duration),
}

/// One recorded `post` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAttempt {
    pub connection_id: String,
    pub payload: String,
}

/// Push transport that records every attempt.
#[derive(Debug, Clone, Default)]
pub struct MockPushTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    scripted: HashMap<String, Scripted>,
    attempts: Vec<PushAttempt>,
}

impl MockPushTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `connection_id` answers [`TransportError::Gone`].
    #[must_use]
    pub fn with_gone(self, connection_id: impl Into<String>) -> Self {
        self.script(connection_id, Scripted::Gone)
    }

    /// `connection_id` answers [`TransportError::Transient`].
    #[must_use]
    pub fn with_transient(self, connection_id: impl Into<String>) -> Self {
        self.script(connection_id, Scripted::Transient)
    }

    /// `connection_id` succeeds only after `delay`.
    #[must_use]
    pub fn with_delay(self, connection_id: impl Into<String>, delay: Duration) -> Self {
        self.script(connection_id, Scripted::Delay(delay))
    }

    fn script(self, connection_id: impl Into<String>, behavior: Scripted) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripted
            .insert(connection_id.into(), behavior);
        self
    }

    /// All attempts so far, in call order.
    #[must_use]
    pub fn attempts(&self) -> Vec<PushAttempt> {
        self.inner.lock().unwrap().attempts.clone()
    }

    /// Connection IDs attempted so far, in call order.
    #[must_use]
    pub fn attempted_ids(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .map(|a| a.connection_id)
            .collect()
    }

    /// Panics unless exactly `expected` attempts were made.
    pub fn assert_attempt_count(&self, expected: usize) {
        let actual = self.attempts().len();
        assert_eq!(
            actual, expected,
            "expected {expected} push attempts, got {actual}"
        );
    }
}

#[async_trait]
impl PushTransport for MockPushTransport {
    async fn post(&self, connection_id: &str, payload: Arc<str>) -> Result<(), TransportError> {
        let behavior = {
            let mut inner = self.inner.lock().unwrap();
            inner.attempts.push(PushAttempt {
                connection_id: connection_id.to_string(),
                payload: payload.to_string(),
            });
            inner.scripted.get(connection_id).cloned()
        };

        match behavior {
            None => Ok(()),
            Some(Scripted::Gone) => Err(TransportError::Gone),
            Some(Scripted::Transient) => Err(TransportError::Transient("scripted".to_string())),
            Some(Scripted::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
