//! Connect/disconnect events from the push channel.
//!
//! Connect writes an active record; disconnect flips it inactive. Disconnect
//! always acknowledges: the session is already gone and there is nobody to
//! report a failure to.

use crate::errors::BsError;
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Translates transport lifecycle events into registry writes.
#[derive(Clone)]
pub struct ConnectionLifecycleHandler {
    registry: Arc<dyn ConnectionRegistry>,
}

impl ConnectionLifecycleHandler {
    #[must_use]
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Record a new connection as active.
    ///
    /// Missing meeting/participant IDs are not rejected here; the handshake
    /// layer validates them.
    ///
    /// # Errors
    ///
    /// Propagates registry save failures so the transport can refuse the
    /// connection.
    #[instrument(skip_all, fields(connection_id = %connection_id, meeting_id = %meeting_id))]
    pub async fn on_connect(
        &self,
        connection_id: &str,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), BsError> {
        let record = ConnectionRecord::new_active(connection_id, meeting_id, participant_id);
        self.registry.save(&record).await?;

        info!(
            target: "bs.lifecycle",
            participant_id = %participant_id,
            "Connection registered"
        );
        Ok(())
    }

    /// Record a connection as gone.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn on_disconnect(&self, connection_id: &str) {
        if self.registry.deactivate(connection_id).await {
            info!(
                target: "bs.lifecycle",
                "Connection deactivated"
            );
        } else {
            warn!(
                target: "bs.lifecycle",
                "Disconnect for unknown or unreachable connection"
            );
        }
    }
}
