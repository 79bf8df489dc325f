//! Redis-backed connection registry.
//!
//! # Key Patterns
//!
//! - `connection:{id}` - Connection record (HASH: `ConnectionId`, `ParticipantId`,
//!   `MeetingId`, `ConnectedAt`, `IsActive`)
//! - `meeting:{id}:connections:active` - Active connection IDs for a meeting (SET)
//!
//! Writes go through the Lua scripts in [`super::lua_scripts`] so the hash and
//! the per-meeting index never disagree. `MultiplexedConnection` is cloned per
//! operation; no locking is needed.

use super::{lua_scripts, ConnectionRecord, ConnectionRegistry};
use crate::errors::BsError;
use crate::observability::record_redis_latency;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

const CONNECTION_KEY_PREFIX: &str = "connection:";
const INDEX_KEY_PREFIX: &str = "meeting:";
const INDEX_KEY_SUFFIX: &str = ":connections:active";

const FIELD_CONNECTION_ID: &str = "ConnectionId";
const FIELD_PARTICIPANT_ID: &str = "ParticipantId";
const FIELD_MEETING_ID: &str = "MeetingId";
const FIELD_CONNECTED_AT: &str = "ConnectedAt";
const FIELD_IS_ACTIVE: &str = "IsActive";

/// Script reply when `MeetingId` changed between the read and the script.
const SCRIPT_CONFLICT: i64 = -1;
const MAX_SCRIPT_ATTEMPTS: u32 = 3;

fn connection_key(connection_id: &str) -> String {
    format!("{CONNECTION_KEY_PREFIX}{connection_id}")
}

fn index_key(meeting_id: &str) -> String {
    format!("{INDEX_KEY_PREFIX}{meeting_id}{INDEX_KEY_SUFFIX}")
}

/// Index the save script may need to clean up. Falls back to the new
/// meeting's index when there is no previous record, since the script
/// only touches KEYS[3] when the meeting changed.
fn previous_index_key(previous_meeting: Option<&str>, meeting_id: &str) -> String {
    index_key(previous_meeting.unwrap_or(meeting_id))
}

/// Open a multiplexed connection.
///
/// # Errors
///
/// Returns `BsError::Redis` if the client cannot be opened or connected.
pub async fn open_connection(redis_url: &str) -> Result<MultiplexedConnection, BsError> {
    let client = Client::open(redis_url).map_err(|e| {
        // Do NOT log redis_url, it may carry a password
        error!(
            target: "bs.registry.redis",
            error = %e,
            "Failed to open Redis client"
        );
        BsError::Redis(format!("Failed to open Redis client: {e}"))
    })?;

    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| {
            error!(
                target: "bs.registry.redis",
                error = %e,
                "Failed to connect to Redis"
            );
            BsError::Redis(format!("Failed to connect to Redis: {e}"))
        })
}

/// Registry stored in Redis, shared by every broadcast instance.
#[derive(Clone)]
pub struct RedisConnectionRegistry {
    connection: MultiplexedConnection,
    save_script: Script,
    deactivate_script: Script,
}

impl RedisConnectionRegistry {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `BsError::Redis` if the client cannot be opened or connected.
    pub async fn new(redis_url: &str) -> Result<Self, BsError> {
        Ok(Self::from_connection(open_connection(redis_url).await?))
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            save_script: Script::new(lua_scripts::SAVE_CONNECTION),
            deactivate_script: Script::new(lua_scripts::DEACTIVATE_CONNECTION),
        }
    }

    async fn current_meeting(
        conn: &mut MultiplexedConnection,
        connection_id: &str,
    ) -> Result<Option<String>, BsError> {
        conn.hget(connection_key(connection_id), FIELD_MEETING_ID)
            .await
            .map_err(|e| BsError::Redis(format!("Failed to read connection meeting: {e}")))
    }

    async fn try_save(&self, record: &ConnectionRecord) -> Result<(), BsError> {
        let mut conn = self.connection.clone();

        for attempt in 1..=MAX_SCRIPT_ATTEMPTS {
            let previous = Self::current_meeting(&mut conn, &record.connection_id).await?;

            let result: i64 = self
                .save_script
                .key(connection_key(&record.connection_id))
                .key(index_key(&record.meeting_id))
                .key(previous_index_key(previous.as_deref(), &record.meeting_id))
                .arg(&record.connection_id)
                .arg(&record.participant_id)
                .arg(&record.meeting_id)
                .arg(record.connected_at.to_rfc3339())
                .arg(if record.active { "1" } else { "0" })
                .arg(previous.as_deref().unwrap_or(""))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| BsError::Redis(format!("Failed to save connection record: {e}")))?;

            if result != SCRIPT_CONFLICT {
                return Ok(());
            }
            debug!(
                target: "bs.registry.redis",
                attempt = attempt,
                "Connection meeting changed during save, retrying"
            );
        }

        Err(BsError::Redis(
            "Connection record kept changing during save".to_string(),
        ))
    }

    async fn try_deactivate(&self, connection_id: &str) -> Result<bool, BsError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();

        for attempt in 1..=MAX_SCRIPT_ATTEMPTS {
            let Some(meeting_id) = Self::current_meeting(&mut conn, connection_id).await? else {
                record_redis_latency("deactivate", start.elapsed());
                return Ok(false);
            };

            let result: i64 = self
                .deactivate_script
                .key(connection_key(connection_id))
                .key(index_key(&meeting_id))
                .arg(connection_id)
                .arg(&meeting_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| BsError::Redis(format!("Failed to deactivate connection: {e}")))?;

            if result != SCRIPT_CONFLICT {
                record_redis_latency("deactivate", start.elapsed());
                return Ok(result == 1);
            }
            debug!(
                target: "bs.registry.redis",
                attempt = attempt,
                "Connection meeting changed during deactivate, retrying"
            );
        }

        Err(BsError::Redis(
            "Connection record kept changing during deactivate".to_string(),
        ))
    }
}

#[async_trait]
impl ConnectionRegistry for RedisConnectionRegistry {
    #[instrument(skip_all, fields(connection_id = %record.connection_id, meeting_id = %record.meeting_id))]
    async fn save(&self, record: &ConnectionRecord) -> Result<(), BsError> {
        let start = Instant::now();

        self.try_save(record).await.map_err(|e| {
            error!(
                target: "bs.registry.redis",
                error = %e,
                "Failed to save connection record"
            );
            e
        })?;

        record_redis_latency("save", start.elapsed());

        debug!(
            target: "bs.registry.redis",
            active = record.active,
            "Saved connection record"
        );

        Ok(())
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn list_active(&self, meeting_id: &str) -> Result<Vec<ConnectionRecord>, BsError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();

        let ids: Vec<String> = conn.smembers(index_key(meeting_id)).await.map_err(|e| {
            error!(
                target: "bs.registry.redis",
                error = %e,
                "Failed to read active index"
            );
            BsError::Redis(format!("Failed to read active index: {e}"))
        })?;

        if ids.is_empty() {
            record_redis_latency("list_active", start.elapsed());
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(connection_key(id));
        }

        let hashes: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(|e| {
                error!(
                    target: "bs.registry.redis",
                    error = %e,
                    "Failed to read connection records"
                );
                BsError::Redis(format!("Failed to read connection records: {e}"))
            })?;

        record_redis_latency("list_active", start.elapsed());

        let mut records = Vec::with_capacity(hashes.len());
        for (id, fields) in ids.iter().zip(hashes) {
            match record_from_fields(id, &fields) {
                Ok(Some(record)) if record.active && record.meeting_id == meeting_id => {
                    records.push(record);
                }
                Ok(_) => {
                    debug!(
                        target: "bs.registry.redis",
                        connection_id = %id,
                        "Skipping stale index entry"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "bs.registry.redis",
                        connection_id = %id,
                        error = %e,
                        "Skipping unreadable connection record"
                    );
                }
            }
        }

        Ok(records)
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    async fn deactivate(&self, connection_id: &str) -> bool {
        match self.try_deactivate(connection_id).await {
            Ok(found) => {
                if !found {
                    debug!(
                        target: "bs.registry.redis",
                        "Deactivate for unknown connection"
                    );
                }
                found
            }
            Err(e) => {
                warn!(
                    target: "bs.registry.redis",
                    error = %e,
                    "Failed to deactivate connection"
                );
                false
            }
        }
    }
}

/// Rebuild a record from its hash fields.
///
/// Returns `Ok(None)` for an empty hash (the key does not exist).
fn record_from_fields(
    connection_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<ConnectionRecord>, BsError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| BsError::Decode(format!("connection {connection_id} missing {name}")))
    };

    let connected_at = DateTime::parse_from_rfc3339(&field(FIELD_CONNECTED_AT)?)
        .map_err(|e| BsError::Decode(format!("connection {connection_id} ConnectedAt: {e}")))?
        .with_timezone(&Utc);

    let active = match field(FIELD_IS_ACTIVE)?.as_str() {
        "1" | "true" => true,
        "0" | "false" => false,
        other => {
            return Err(BsError::Decode(format!(
                "connection {connection_id} IsActive: unexpected '{other}'"
            )))
        }
    };

    Ok(Some(ConnectionRecord {
        connection_id: field(FIELD_CONNECTION_ID)?,
        meeting_id: field(FIELD_MEETING_ID)?,
        participant_id: field(FIELD_PARTICIPANT_ID)?,
        connected_at,
        active,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fields(active: &str) -> HashMap<String, String> {
        HashMap::from([
            (FIELD_CONNECTION_ID.to_string(), "c1".to_string()),
            (FIELD_PARTICIPANT_ID.to_string(), "p1".to_string()),
            (FIELD_MEETING_ID.to_string(), "m1".to_string()),
            (
                FIELD_CONNECTED_AT.to_string(),
                "2024-05-01T10:00:00+00:00".to_string(),
            ),
            (FIELD_IS_ACTIVE.to_string(), active.to_string()),
        ])
    }

    #[test]
    fn test_key_patterns() {
        assert_eq!(connection_key("abc"), "connection:abc");
        assert_eq!(index_key("m1"), "meeting:m1:connections:active");
    }

    #[test]
    fn test_previous_index_key_follows_stored_meeting() {
        assert_eq!(
            previous_index_key(Some("m0"), "m1"),
            "meeting:m0:connections:active"
        );
        assert_eq!(
            previous_index_key(None, "m1"),
            "meeting:m1:connections:active"
        );
    }

    #[test]
    fn test_record_from_fields_active() {
        let record = record_from_fields("c1", &fields("1")).unwrap().unwrap();
        assert_eq!(record.connection_id, "c1");
        assert_eq!(record.meeting_id, "m1");
        assert_eq!(record.participant_id, "p1");
        assert!(record.active);
        assert_eq!(record.connected_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_record_from_fields_inactive() {
        let record = record_from_fields("c1", &fields("0")).unwrap().unwrap();
        assert!(!record.active);
    }

    #[test]
    fn test_record_from_fields_missing_key() {
        assert!(record_from_fields("c1", &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_record_from_fields_rejects_bad_flag() {
        let err = record_from_fields("c1", &fields("yes")).unwrap_err();
        assert!(matches!(err, BsError::Decode(_)));
    }

    #[test]
    fn test_record_from_fields_rejects_missing_field() {
        let mut partial = fields("1");
        partial.remove(FIELD_MEETING_ID);
        let err = record_from_fields("c1", &partial).unwrap_err();
        assert!(err.to_string().contains("MeetingId"));
    }
}
