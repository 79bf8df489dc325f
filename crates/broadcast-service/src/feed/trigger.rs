//! Change-feed trigger: turns inserted messages into broadcasts.

use super::record::{FeedEventKind, FeedRecord};
use crate::errors::BsError;
use crate::gateway::BroadcastGateway;
use crate::observability::{record_fanout, record_feed_record};
use crate::registry::ConnectionRegistry;
use common::wire::ServerFrame;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// What happened to one feed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Pushed to `targets` active connections, `delivered` of which succeeded.
    Broadcast { targets: usize, delivered: usize },
    /// Not an insert; nothing pushed.
    Skipped(FeedEventKind),
}

/// Reacts to change-feed records.
#[derive(Clone)]
pub struct ChangeFeedTrigger {
    registry: Arc<dyn ConnectionRegistry>,
    gateway: BroadcastGateway,
}

impl ChangeFeedTrigger {
    #[must_use]
    pub fn new(registry: Arc<dyn ConnectionRegistry>, gateway: BroadcastGateway) -> Self {
        Self { registry, gateway }
    }

    /// Process one record.
    ///
    /// Inserts are decoded, the meeting's active connections are looked up
    /// and the encoded message is pushed to all of them with a single
    /// `push_many`. Modify and remove records are skipped.
    ///
    /// # Errors
    ///
    /// Decode failures and registry read failures propagate so the caller can
    /// leave the record for retry. Push failures never do.
    #[instrument(skip_all, fields(event = record.event.as_str()))]
    pub async fn handle_record(&self, record: &FeedRecord) -> Result<RecordOutcome, BsError> {
        if record.event != FeedEventKind::Insert {
            debug!(
                target: "bs.feed.trigger",
                "Skipping non-insert record"
            );
            record_feed_record(record.event.as_str(), "skipped");
            return Ok(RecordOutcome::Skipped(record.event));
        }

        match self.broadcast_insert(record).await {
            Ok(outcome) => {
                record_feed_record(record.event.as_str(), "success");
                Ok(outcome)
            }
            Err(e) => {
                record_feed_record(record.event.as_str(), "error");
                Err(e)
            }
        }
    }

    async fn broadcast_insert(&self, record: &FeedRecord) -> Result<RecordOutcome, BsError> {
        let message = record.message()?;
        let start = Instant::now();

        let active = self.registry.list_active(&message.meeting_id).await?;
        let connection_ids: Vec<String> = active.into_iter().map(|r| r.connection_id).collect();

        let payload: Arc<str> = Arc::from(ServerFrame::Message(message.clone()).encode()?);
        let delivered = self.gateway.push_many(&connection_ids, payload).await;

        let targets = connection_ids.len();
        record_fanout(targets, start.elapsed());

        info!(
            target: "bs.feed.trigger",
            meeting_id = %message.meeting_id,
            message_id = %message.message_id,
            content_len = message.content.len(),
            targets,
            delivered,
            "Broadcast message"
        );

        Ok(RecordOutcome::Broadcast { targets, delivered })
    }

    /// Process a batch. Every record is attempted; a failure affects only the
    /// result at its own index.
    pub async fn handle_batch(&self, records: &[FeedRecord]) -> Vec<Result<RecordOutcome, BsError>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let result = self.handle_record(record).await;
            if let Err(e) = &result {
                warn!(
                    target: "bs.feed.trigger",
                    error = %e,
                    "Feed record failed"
                );
            }
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::gateway::{PushTransport, TransportError};
    use crate::registry::{ConnectionRecord, MemoryConnectionRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        posts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn post(&self, connection_id: &str, payload: Arc<str>) -> Result<(), TransportError> {
            self.posts
                .lock()
                .unwrap()
                .push((connection_id.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn insert(meeting_id: &str, content: &str) -> FeedRecord {
        FeedRecord {
            event: FeedEventKind::Insert,
            new_image: Some(json!({
                "messageId": "msg-1",
                "meetingId": meeting_id,
                "participantId": "p1",
                "participantName": "Ada",
                "content": content,
                "createdAt": "2024-05-01T10:00:00Z",
                "likeCount": 0,
                "reportedCount": 0,
                "isActive": true
            })),
        }
    }

    async fn setup() -> (ChangeFeedTrigger, Arc<RecordingTransport>) {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        registry
            .save(&ConnectionRecord::new_active("c1", "m1", "p1"))
            .await
            .unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let gateway = BroadcastGateway::new(transport.clone(), Duration::from_secs(1));
        (ChangeFeedTrigger::new(registry, gateway), transport)
    }

    #[tokio::test]
    async fn test_insert_pushes_encoded_message_frame() {
        let (trigger, transport) = setup().await;

        let outcome = trigger.handle_record(&insert("m1", "hello")).await.unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Broadcast {
                targets: 1,
                delivered: 1
            }
        );

        let posts = transport.posts.lock().unwrap().clone();
        let (connection_id, payload) = posts.first().unwrap();
        assert_eq!(connection_id, "c1");
        match ServerFrame::decode(payload).unwrap() {
            ServerFrame::Message(message) => assert_eq!(message.content, "hello"),
            ServerFrame::Connected { .. } => unreachable!("expected message frame"),
        }
    }

    #[tokio::test]
    async fn test_insert_for_meeting_without_connections() {
        let (trigger, transport) = setup().await;

        let outcome = trigger.handle_record(&insert("m2", "hi")).await.unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Broadcast {
                targets: 0,
                delivered: 0
            }
        );
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_modify_and_remove_are_skipped() {
        let (trigger, transport) = setup().await;

        for event in [FeedEventKind::Modify, FeedEventKind::Remove] {
            let mut record = insert("m1", "edited");
            record.event = event;
            assert_eq!(
                trigger.handle_record(&record).await.unwrap(),
                RecordOutcome::Skipped(event)
            );
        }
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_isolates_decode_failure() {
        let (trigger, transport) = setup().await;
        let broken = FeedRecord {
            event: FeedEventKind::Insert,
            new_image: Some(json!({"meetingId": "m1"})),
        };

        let results = trigger
            .handle_batch(&[broken, insert("m1", "after")])
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results.first(), Some(Err(BsError::Decode(_)))));
        assert!(matches!(results.get(1), Some(Ok(RecordOutcome::Broadcast { .. }))));
        assert_eq!(transport.posts.lock().unwrap().len(), 1);
    }
}
