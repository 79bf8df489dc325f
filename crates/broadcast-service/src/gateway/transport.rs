//! Push transport seam.
//!
//! The gateway only needs "deliver this payload to that connection". The
//! production implementation is the in-process [`super::ConnectionHub`];
//! tests substitute a recording mock.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Why a single push failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection no longer exists on the transport.
    #[error("connection gone")]
    Gone,

    /// Any other failure (full buffer, timeout, I/O).
    #[error("transient push failure: {0}")]
    Transient(String),
}

impl TransportError {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            TransportError::Gone => "gone",
            TransportError::Transient(_) => "transient",
        }
    }
}

/// Deliver a payload to one connection.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Post `payload` to `connection_id`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Gone`] if the connection is unknown or closed,
    /// [`TransportError::Transient`] for anything else.
    async fn post(&self, connection_id: &str, payload: Arc<str>) -> Result<(), TransportError>;
}
