//! Test data for broadcast service tests.
//!
//! - Message images as they appear in the change feed
//! - Feed records and raw stream fields
//! - Small helpers for connection ID lists and payloads

use broadcast_service::feed::record::{FIELD_EVENT_NAME, FIELD_NEW_IMAGE};
use broadcast_service::feed::{FeedEventKind, FeedRecord};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Builder for a persisted message image.
#[derive(Debug, Clone)]
pub struct TestMessage {
    pub message_id: String,
    pub meeting_id: String,
    pub participant_id: String,
    pub participant_name: String,
    pub content: String,
}

impl TestMessage {
    /// Message in `meeting_id` with the given content.
    #[must_use]
    pub fn new(meeting_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: format!("msg-{}", Uuid::new_v4()),
            meeting_id: meeting_id.into(),
            participant_id: "p-author".to_string(),
            participant_name: "Test Author".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn with_author(
        mut self,
        participant_id: impl Into<String>,
        participant_name: impl Into<String>,
    ) -> Self {
        self.participant_id = participant_id.into();
        self.participant_name = participant_name.into();
        self
    }

    /// The change-feed image, with `isActive` as the numeric flag the store
    /// writes.
    #[must_use]
    pub fn image(&self) -> Value {
        json!({
            "messageId": self.message_id,
            "meetingId": self.meeting_id,
            "participantId": self.participant_id,
            "participantName": self.participant_name,
            "content": self.content,
            "createdAt": "2024-05-01T10:00:00Z",
            "likeCount": 0,
            "reportedCount": 0,
            "isActive": 1
        })
    }

    /// An insert record carrying this message.
    #[must_use]
    pub fn insert_record(&self) -> FeedRecord {
        FeedRecord {
            event: FeedEventKind::Insert,
            new_image: Some(self.image()),
        }
    }

    /// A modify record carrying this message.
    #[must_use]
    pub fn modify_record(&self) -> FeedRecord {
        FeedRecord {
            event: FeedEventKind::Modify,
            new_image: Some(self.image()),
        }
    }

    /// Raw stream-entry fields for an insert of this message.
    #[must_use]
    pub fn insert_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            (FIELD_EVENT_NAME.to_string(), "INSERT".to_string()),
            (FIELD_NEW_IMAGE.to_string(), self.image().to_string()),
        ])
    }
}

/// A remove record; removes carry no new image.
#[must_use]
pub fn remove_record() -> FeedRecord {
    FeedRecord {
        event: FeedEventKind::Remove,
        new_image: None,
    }
}

/// Owned connection ID list.
#[must_use]
pub fn ids<const N: usize>(ids: [&str; N]) -> Vec<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}

/// Shared payload.
#[must_use]
pub fn payload(text: &str) -> Arc<str> {
    Arc::from(text)
}
