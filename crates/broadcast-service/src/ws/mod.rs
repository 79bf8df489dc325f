//! WebSocket push channel.
//!
//! `GET /ws?meetingId=..&participantId=..` upgrades to a WebSocket. Each
//! session gets a fresh connection ID, is attached to the [`ConnectionHub`]
//! and recorded through the lifecycle handler. A single writer task owns the
//! socket sink and drains the session's channel; the reader loop only watches
//! for close.
//!
//! Close codes:
//! - 1001: server shutting down
//! - 1011: registration failed

use crate::gateway::ConnectionHub;
use crate::lifecycle::ConnectionLifecycleHandler;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::wire::ServerFrame;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Shared state for push-channel sessions.
#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<ConnectionHub>,
    pub lifecycle: ConnectionLifecycleHandler,
    /// Per-session outbound buffer size.
    pub outbound_buffer: usize,
    /// Cancelled on shutdown; open sessions are closed with 1001.
    pub shutdown: CancellationToken,
}

/// Handshake query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub meeting_id: Option<String>,
    pub participant_id: Option<String>,
}

impl HandshakeQuery {
    /// Both IDs, or a description of what is missing.
    fn require(self) -> Result<(String, String), &'static str> {
        let meeting_id = self
            .meeting_id
            .filter(|v| !v.is_empty())
            .ok_or("meetingId is required")?;
        let participant_id = self
            .participant_id
            .filter(|v| !v.is_empty())
            .ok_or("participantId is required")?;
        Ok((meeting_id, participant_id))
    }
}

/// Router serving the push channel at `/ws`.
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<HandshakeQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let (meeting_id, participant_id) = match query.require() {
        Ok(ids) => ids,
        Err(reason) => {
            debug!(target: "bs.ws", reason, "Rejected handshake");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response();
    };

    ws.on_upgrade(move |socket| run_session(socket, state, meeting_id, participant_id))
}

/// Drive one session from registration to cleanup.
async fn run_session(socket: WebSocket, state: WsState, meeting_id: String, participant_id: String) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.outbound_buffer);

    state.hub.register(&connection_id, tx.clone()).await;

    if let Err(e) = state
        .lifecycle
        .on_connect(&connection_id, &meeting_id, &participant_id)
        .await
    {
        error!(
            target: "bs.ws",
            connection_id = %connection_id,
            error = %e,
            "Failed to register connection, closing"
        );
        state.hub.unregister(&connection_id).await;
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INTERNAL_ERROR,
                reason: e.client_message().into(),
            })))
            .await;
        return;
    }

    info!(
        target: "bs.ws",
        connection_id = %connection_id,
        meeting_id = %meeting_id,
        "Session opened"
    );

    let connected = ServerFrame::Connected {
        connection_id: connection_id.clone(),
    };
    match connected.encode() {
        Ok(frame) => {
            let _ = tx.send(Message::Text(frame)).await;
        }
        Err(e) => {
            warn!(target: "bs.ws", error = %e, "Failed to encode connected frame");
        }
    }

    let writer = tokio::spawn(writer_task(sink, rx));

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    debug!(
                        target: "bs.ws",
                        connection_id = %connection_id,
                        len = text.len(),
                        "Ignoring client text frame"
                    );
                }
                // Pings are answered by the WebSocket layer itself.
                Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(
                        target: "bs.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Socket read error"
                    );
                    break;
                }
            }
        }
    }

    state.hub.unregister(&connection_id).await;
    drop(tx);
    state.lifecycle.on_disconnect(&connection_id).await;

    // Lets a queued close frame flush; exits once the hub's sender is gone.
    if tokio::time::timeout(std::time::Duration::from_secs(1), writer)
        .await
        .is_err()
    {
        debug!(target: "bs.ws", connection_id = %connection_id, "Writer did not finish");
    }

    info!(
        target: "bs.ws",
        connection_id = %connection_id,
        "Session closed"
    );
}

/// Forward queued messages to the socket until the channel closes or a
/// write fails.
async fn writer_task(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn query(meeting: Option<&str>, participant: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            meeting_id: meeting.map(str::to_string),
            participant_id: participant.map(str::to_string),
        }
    }

    #[test]
    fn test_require_both_ids() {
        let (meeting, participant) = query(Some("m1"), Some("p1")).require().unwrap();
        assert_eq!(meeting, "m1");
        assert_eq!(participant, "p1");
    }

    #[test]
    fn test_missing_or_empty_ids_rejected() {
        assert_eq!(
            query(None, Some("p1")).require().unwrap_err(),
            "meetingId is required"
        );
        assert_eq!(
            query(Some(""), Some("p1")).require().unwrap_err(),
            "meetingId is required"
        );
        assert_eq!(
            query(Some("m1"), Some("")).require().unwrap_err(),
            "participantId is required"
        );
    }
}
