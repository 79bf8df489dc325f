//! Transport seam for the client.
//!
//! A [`Connector`] opens one push channel and hands back a [`ChannelHandle`]:
//! a sender for outbound text and a receiver of inbound frames ending in a
//! [`InboundEvent::Closed`]. Dropping the handle closes the channel normally.

use crate::errors::ClientError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::debug;
use url::Url;

/// Per-channel buffer in each direction.
const CHANNEL_BUFFER: usize = 64;

/// Something the server sent, or the end of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Frame(String),
    /// Channel ended. `Some(1000)` is a normal close; `None` means no close
    /// frame (reset, I/O error).
    Closed { code: Option<u16> },
}

/// An open push channel.
#[derive(Debug)]
pub struct ChannelHandle {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

/// Opens push channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel for `participant_id` in `meeting_id`.
    ///
    /// # Errors
    ///
    /// `ClientError::ConnectFailed` if the transport refuses the handshake.
    async fn open(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<ChannelHandle, ClientError>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base: Url,
}

impl WebSocketConnector {
    /// `url` is the push-channel endpoint, e.g. `ws://host:8080/ws`.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidUrl` if `url` does not parse or is not `ws`/`wss`.
    pub fn new(url: &str) -> Result<Self, ClientError> {
        let base = Url::parse(url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                base.scheme()
            )));
        }
        Ok(Self { base })
    }

    /// Handshake URL carrying the meeting and participant IDs.
    #[must_use]
    pub fn handshake_url(&self, meeting_id: &str, participant_id: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("meetingId", meeting_id)
            .append_pair("participantId", participant_id);
        url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<ChannelHandle, ClientError> {
        let url = self.handshake_url(meeting_id, participant_id);
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(CHANNEL_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = outbound_rx.recv() => match out {
                        Some(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                let _ = inbound_tx.send(InboundEvent::Closed { code: None }).await;
                                break;
                            }
                        }
                        None => {
                            // Handle dropped: close normally.
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "".into(),
                                })))
                                .await;
                            break;
                        }
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(InboundEvent::Frame(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            let _ = inbound_tx.send(InboundEvent::Closed { code }).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "client.session", error = %e, "Socket read error");
                            let _ = inbound_tx.send(InboundEvent::Closed { code: None }).await;
                            break;
                        }
                        None => {
                            let _ = inbound_tx.send(InboundEvent::Closed { code: None }).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(ChannelHandle {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_url_carries_ids() {
        let connector = WebSocketConnector::new("ws://localhost:8080/ws").unwrap();
        let url = connector.handshake_url("m 1", "p1");
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/ws?meetingId=m+1&participantId=p1"
        );
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        assert!(matches!(
            WebSocketConnector::new("http://localhost/ws"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            WebSocketConnector::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
