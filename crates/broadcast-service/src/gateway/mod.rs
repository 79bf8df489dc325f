//! Broadcast gateway: push one payload to many connections.
//!
//! Fan-out is concurrent and never fail-fast. Each target's outcome is
//! counted independently; one dead connection does not stop delivery to the
//! rest. Failures are logged and swallowed here, and the gateway never
//! touches the registry.

pub mod hub;
pub mod transport;

use crate::observability::record_push;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub use hub::{ConnectionHub, SessionSender};
pub use transport::{PushTransport, TransportError};

/// Pushes payloads through a [`PushTransport`].
#[derive(Clone)]
pub struct BroadcastGateway {
    transport: Arc<dyn PushTransport>,
    push_timeout: Duration,
}

impl BroadcastGateway {
    /// Create a gateway. Each push is bounded by `push_timeout`.
    #[must_use]
    pub fn new(transport: Arc<dyn PushTransport>, push_timeout: Duration) -> Self {
        Self {
            transport,
            push_timeout,
        }
    }

    /// Deliver `payload` to one connection.
    ///
    /// Returns `true` on success. A gone connection or any other failure
    /// (including the push timing out) returns `false`; nothing is raised.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn push_one(&self, connection_id: &str, payload: Arc<str>) -> bool {
        let result = tokio::time::timeout(
            self.push_timeout,
            self.transport.post(connection_id, payload),
        )
        .await
        .unwrap_or_else(|_| Err(TransportError::Transient("push timed out".to_string())));

        match result {
            Ok(()) => {
                record_push("success");
                true
            }
            Err(TransportError::Gone) => {
                record_push(TransportError::Gone.outcome());
                debug!(
                    target: "bs.gateway",
                    "Connection gone, skipping"
                );
                false
            }
            Err(e) => {
                record_push(e.outcome());
                warn!(
                    target: "bs.gateway",
                    error = %e,
                    "Push failed"
                );
                false
            }
        }
    }

    /// Deliver `payload` to every connection in `connection_ids` concurrently.
    ///
    /// IDs are not deduplicated: a repeated ID is attempted once per
    /// occurrence. Returns the number of successful pushes.
    #[instrument(skip_all, fields(targets = connection_ids.len()))]
    pub async fn push_many(&self, connection_ids: &[String], payload: Arc<str>) -> usize {
        if connection_ids.is_empty() {
            return 0;
        }

        let attempts = connection_ids
            .iter()
            .map(|id| self.push_one(id, Arc::clone(&payload)));

        let delivered = join_all(attempts)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        debug!(
            target: "bs.gateway",
            targets = connection_ids.len(),
            delivered,
            "Fan-out complete"
        );

        delivered
    }
}
