//! In-process hub of live WebSocket sessions.
//!
//! Each session registers the sending half of a bounded channel; its writer
//! task drains the channel into the socket. Posting is non-blocking: a full
//! buffer is a transient failure, a closed channel means the session is gone.

use super::transport::{PushTransport, TransportError};
use crate::observability::set_connections_active;
use async_trait::async_trait;
use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Sender half handed to a session's writer task.
pub type SessionSender = mpsc::Sender<Message>;

/// Connection ID -> session sender.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    sessions: RwLock<HashMap<String, SessionSender>>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session. Replaces any previous sender for the same ID.
    pub async fn register(&self, connection_id: &str, sender: SessionSender) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(connection_id.to_string(), sender);
        set_connections_active(sessions.len());
    }

    /// Detach a session. Returns whether it was present.
    pub async fn unregister(&self, connection_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(connection_id).is_some();
        set_connections_active(sessions.len());
        removed
    }

    /// Number of attached sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl PushTransport for ConnectionHub {
    async fn post(&self, connection_id: &str, payload: Arc<str>) -> Result<(), TransportError> {
        let sender = {
            let sessions = self.sessions.read().await;
            sessions.get(connection_id).cloned()
        };

        let Some(sender) = sender else {
            return Err(TransportError::Gone);
        };

        match sender.try_send(Message::Text(payload.to_string())) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Transient(
                "outbound buffer full".to_string(),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    target: "bs.gateway.hub",
                    connection_id = %connection_id,
                    "Session channel closed, dropping sender"
                );
                self.unregister(connection_id).await;
                Err(TransportError::Gone)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_delivers_to_registered_session() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("c1", tx).await;

        hub.post("c1", Arc::from("hello")).await.unwrap();

        match rx.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_post_unknown_connection_is_gone() {
        let hub = ConnectionHub::new();
        let result = hub.post("missing", Arc::from("x")).await;
        assert_eq!(result, Err(TransportError::Gone));
    }

    #[tokio::test]
    async fn test_post_full_buffer_is_transient() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("c1", tx).await;

        hub.post("c1", Arc::from("first")).await.unwrap();
        let result = hub.post("c1", Arc::from("second")).await;

        assert!(matches!(result, Err(TransportError::Transient(_))));
        assert_eq!(hub.len().await, 1, "Full buffer keeps the session");
    }

    #[tokio::test]
    async fn test_post_closed_session_is_gone_and_removed() {
        let hub = ConnectionHub::new();
        let (tx, rx) = mpsc::channel(4);
        hub.register("c1", tx).await;
        drop(rx);

        let result = hub.post("c1", Arc::from("x")).await;

        assert_eq!(result, Err(TransportError::Gone));
        assert!(hub.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_reports_presence() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("c1", tx).await;

        assert!(hub.unregister("c1").await);
        assert!(!hub.unregister("c1").await);
    }
}
