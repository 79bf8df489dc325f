//! Change-feed records.
//!
//! Each stream entry carries:
//! - `eventName`: `insert`, `modify` or `remove` (case-insensitive)
//! - `newImage`: JSON object with the message fields (absent for `remove`)

use crate::errors::BsError;
use common::wire::BroadcastMessage;
use serde_json::Value;
use std::collections::HashMap;

pub const FIELD_EVENT_NAME: &str = "eventName";
pub const FIELD_NEW_IMAGE: &str = "newImage";

/// Kind of change to a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEventKind {
    Insert,
    Modify,
    Remove,
}

impl FeedEventKind {
    /// Metric/log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FeedEventKind::Insert => "insert",
            FeedEventKind::Modify => "modify",
            FeedEventKind::Remove => "remove",
        }
    }

    fn parse(raw: &str) -> Result<Self, BsError> {
        match raw.to_ascii_lowercase().as_str() {
            "insert" => Ok(FeedEventKind::Insert),
            "modify" => Ok(FeedEventKind::Modify),
            "remove" => Ok(FeedEventKind::Remove),
            other => Err(BsError::Decode(format!("unknown eventName '{other}'"))),
        }
    }
}

/// One change event from the persisted message store.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub event: FeedEventKind,
    pub new_image: Option<Value>,
}

impl FeedRecord {
    /// Build a record from stream entry fields.
    ///
    /// # Errors
    ///
    /// `BsError::Decode` if `eventName` is missing or unknown, or `newImage`
    /// is present but not valid JSON.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, BsError> {
        let event = fields
            .get(FIELD_EVENT_NAME)
            .ok_or_else(|| BsError::Decode(format!("missing {FIELD_EVENT_NAME}")))
            .and_then(|raw| FeedEventKind::parse(raw))?;

        let new_image = fields
            .get(FIELD_NEW_IMAGE)
            .map(|raw| {
                serde_json::from_str::<Value>(raw)
                    .map_err(|e| BsError::Decode(format!("{FIELD_NEW_IMAGE} is not JSON: {e}")))
            })
            .transpose()?;

        Ok(Self { event, new_image })
    }

    /// Decode the new image into a message.
    ///
    /// # Errors
    ///
    /// `BsError::Decode` if the image is missing or lacks message fields.
    pub fn message(&self) -> Result<BroadcastMessage, BsError> {
        let image = self.new_image.as_ref().ok_or_else(|| {
            BsError::Decode(format!(
                "{} record has no new image",
                self.event.as_str()
            ))
        })?;

        serde_json::from_value(image.clone())
            .map_err(|e| BsError::Decode(format!("invalid message image: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image() -> Value {
        json!({
            "messageId": "msg-1",
            "meetingId": "m1",
            "participantId": "p1",
            "participantName": "Ada",
            "content": "hello",
            "createdAt": "2024-05-01T10:00:00Z",
            "likeCount": 0,
            "reportedCount": 0,
            "isActive": 1
        })
    }

    fn fields(event: &str, image: Option<&Value>) -> HashMap<String, String> {
        let mut fields = HashMap::from([(FIELD_EVENT_NAME.to_string(), event.to_string())]);
        if let Some(image) = image {
            fields.insert(FIELD_NEW_IMAGE.to_string(), image.to_string());
        }
        fields
    }

    #[test]
    fn test_from_fields_insert() {
        let record = FeedRecord::from_fields(&fields("insert", Some(&image()))).unwrap();
        assert_eq!(record.event, FeedEventKind::Insert);

        let message = record.message().unwrap();
        assert_eq!(message.meeting_id, "m1");
        assert_eq!(message.content, "hello");
        assert!(message.is_active);
    }

    #[test]
    fn test_event_name_is_case_insensitive() {
        let record = FeedRecord::from_fields(&fields("MODIFY", Some(&image()))).unwrap();
        assert_eq!(record.event, FeedEventKind::Modify);
    }

    #[test]
    fn test_remove_without_image() {
        let record = FeedRecord::from_fields(&fields("remove", None)).unwrap();
        assert_eq!(record.event, FeedEventKind::Remove);
        assert!(record.new_image.is_none());
        assert!(record.message().is_err());
    }

    #[test]
    fn test_insert_without_image_names_the_event() {
        let record = FeedRecord::from_fields(&fields("insert", None)).unwrap();
        let err = record.message().unwrap_err();
        assert!(matches!(err, BsError::Decode(_)));
        assert!(err.to_string().contains("insert record has no new image"));
    }

    #[test]
    fn test_missing_event_name_rejected() {
        let err = FeedRecord::from_fields(&HashMap::new()).unwrap_err();
        assert!(matches!(err, BsError::Decode(_)));
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let err = FeedRecord::from_fields(&fields("truncate", None)).unwrap_err();
        assert!(err.to_string().contains("truncate"));
    }

    #[test]
    fn test_non_json_image_rejected() {
        let mut raw = fields("insert", None);
        raw.insert(FIELD_NEW_IMAGE.to_string(), "{not json".to_string());
        assert!(FeedRecord::from_fields(&raw).is_err());
    }

    #[test]
    fn test_image_missing_meeting_id_fails_decode() {
        let mut partial = image();
        partial.as_object_mut().unwrap().remove("meetingId");
        let record = FeedRecord::from_fields(&fields("insert", Some(&partial))).unwrap();
        assert!(matches!(record.message(), Err(BsError::Decode(_))));
    }
}
