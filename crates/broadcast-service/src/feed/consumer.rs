//! Redis Streams change-feed consumer.
//!
//! Reads the message change stream through a consumer group, hands each entry
//! to the [`ChangeFeedTrigger`] and acknowledges the entries that succeeded.
//! Failed entries stay pending. On the pending-retry interval (and once at
//! startup) the consumer sweeps the group's whole pending list with
//! `XAUTOCLAIM`, taking over entries idle for at least that interval, including
//! ones left behind by consumers that no longer run.
//!
//! Blocking `XREADGROUP` holds its connection, so the consumer must be given
//! a connection of its own, not the registry's.

use super::record::FeedRecord;
use super::trigger::{ChangeFeedTrigger, RecordOutcome};
use crate::errors::BsError;
use crate::observability::{record_feed_record, record_redis_latency, HealthState};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Delay before retrying after a failed stream read.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Stream ID that reads new, never-delivered entries.
const NEW_ENTRIES: &str = ">";

/// `XAUTOCLAIM` cursor that starts a sweep and marks its end.
const CLAIM_CURSOR_START: &str = "0-0";

/// Consumer settings, taken from the service config.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub block: Duration,
    pub pending_retry: Duration,
}

/// Result of one read-process-ack pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub read: usize,
    pub acked: usize,
    pub failed: usize,
}

impl PassSummary {
    fn absorb(&mut self, other: PassSummary) {
        self.read += other.read;
        self.acked += other.acked;
        self.failed += other.failed;
    }
}

/// A stream entry reduced to its ID and string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeedEntry {
    id: String,
    fields: HashMap<String, String>,
}

impl From<StreamId> for FeedEntry {
    fn from(entry: StreamId) -> Self {
        let fields = string_fields(&entry.map);
        Self {
            id: entry.id,
            fields,
        }
    }
}

/// Entries sorted by what happens to them before the trigger runs.
#[derive(Debug, Default)]
struct DecodedEntries {
    /// Entries whose data was trimmed from the stream.
    trimmed: Vec<String>,
    /// IDs of `records`, index for index.
    ids: Vec<String>,
    records: Vec<FeedRecord>,
    undecodable: Vec<(String, BsError)>,
}

/// Consumer-group reader for the change stream.
pub struct FeedConsumer {
    connection: MultiplexedConnection,
    trigger: ChangeFeedTrigger,
    settings: FeedSettings,
}

impl FeedConsumer {
    #[must_use]
    pub fn new(
        connection: MultiplexedConnection,
        trigger: ChangeFeedTrigger,
        settings: FeedSettings,
    ) -> Self {
        Self {
            connection,
            trigger,
            settings,
        }
    }

    /// Create the consumer group (and the stream) if missing.
    ///
    /// # Errors
    ///
    /// `BsError::Redis` for any failure other than the group already existing.
    pub async fn ensure_group(&self) -> Result<(), BsError> {
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.settings.stream, &self.settings.group, "$")
            .await;

        match result {
            Ok(()) => {
                info!(
                    target: "bs.feed.consumer",
                    stream = %self.settings.stream,
                    group = %self.settings.group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(BsError::Redis(format!(
                "Failed to create consumer group: {e}"
            ))),
        }
    }

    /// Run until `cancel_token` fires.
    pub async fn run(self, cancel_token: CancellationToken, health: Arc<HealthState>) {
        info!(
            target: "bs.feed.consumer",
            stream = %self.settings.stream,
            group = %self.settings.group,
            consumer = %self.settings.consumer,
            "Feed consumer starting"
        );
        health.set_consuming(true);

        let mut last_pending_pass: Option<Instant> = None;

        loop {
            let pending_due =
                last_pending_pass.map_or(true, |at| at.elapsed() >= self.settings.pending_retry);

            if pending_due {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    result = self.reclaim_pass() => {
                        if let Err(e) = result {
                            warn!(
                                target: "bs.feed.consumer",
                                error = %e,
                                "Pending sweep failed"
                            );
                        }
                    }
                }
                last_pending_pass = Some(Instant::now());
            }

            tokio::select! {
                () = cancel_token.cancelled() => break,
                result = self.read_new() => {
                    if let Err(e) = result {
                        error!(
                            target: "bs.feed.consumer",
                            error = %e,
                            "Stream read failed"
                        );
                        tokio::select! {
                            () = cancel_token.cancelled() => break,
                            () = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        health.set_consuming(false);
        info!(
            target: "bs.feed.consumer",
            "Feed consumer received shutdown signal, exiting"
        );
    }

    /// Read one batch of new entries, process it and ack successes.
    #[instrument(skip_all)]
    async fn read_new(&self) -> Result<PassSummary, BsError> {
        let mut conn = self.connection.clone();

        let block_ms = usize::try_from(self.settings.block.as_millis()).unwrap_or(usize::MAX);
        let options = StreamReadOptions::default()
            .group(&self.settings.group, &self.settings.consumer)
            .count(self.settings.batch_size)
            .block(block_ms);

        let start = Instant::now();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream], &[NEW_ENTRIES], &options)
            .await
            .map_err(|e| BsError::Redis(format!("XREADGROUP failed: {e}")))?;
        record_redis_latency("xreadgroup", start.elapsed());

        let entries: Vec<FeedEntry> = reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(FeedEntry::from)
                    .collect()
            })
            .unwrap_or_default();

        if entries.is_empty() {
            return Ok(PassSummary::default());
        }

        let summary = self.process_entries(&mut conn, entries).await?;
        debug!(
            target: "bs.feed.consumer",
            read = summary.read,
            acked = summary.acked,
            failed = summary.failed,
            "Processed feed batch"
        );
        Ok(summary)
    }

    /// Sweep the group's pending list page by page, claiming entries idle
    /// for at least the pending-retry interval, until the cursor wraps.
    #[instrument(skip_all)]
    async fn reclaim_pass(&self) -> Result<PassSummary, BsError> {
        let mut conn = self.connection.clone();
        let min_idle_ms =
            u64::try_from(self.settings.pending_retry.as_millis()).unwrap_or(u64::MAX);
        let mut cursor = CLAIM_CURSOR_START.to_string();
        let mut total = PassSummary::default();

        loop {
            let start = Instant::now();
            let reply: Value = redis::cmd("XAUTOCLAIM")
                .arg(&self.settings.stream)
                .arg(&self.settings.group)
                .arg(&self.settings.consumer)
                .arg(min_idle_ms)
                .arg(&cursor)
                .arg("COUNT")
                .arg(self.settings.batch_size)
                .query_async(&mut conn)
                .await
                .map_err(|e| BsError::Redis(format!("XAUTOCLAIM failed: {e}")))?;
            record_redis_latency("xautoclaim", start.elapsed());

            let (next_cursor, entries) = parse_autoclaim(&reply)?;
            if !entries.is_empty() {
                total.absorb(self.process_entries(&mut conn, entries).await?);
            }

            if next_cursor == CLAIM_CURSOR_START {
                break;
            }
            cursor = next_cursor;
        }

        if total.read > 0 {
            info!(
                target: "bs.feed.consumer",
                read = total.read,
                acked = total.acked,
                failed = total.failed,
                "Reclaimed pending feed entries"
            );
        }
        Ok(total)
    }

    async fn process_entries(
        &self,
        conn: &mut MultiplexedConnection,
        entries: Vec<FeedEntry>,
    ) -> Result<PassSummary, BsError> {
        let read = entries.len();
        let decoded = decode_entries(entries);

        for (id, e) in &decoded.undecodable {
            warn!(
                target: "bs.feed.consumer",
                entry_id = %id,
                error = %e,
                "Undecodable feed entry left pending"
            );
            record_feed_record("unknown", "error");
        }

        let results = self.trigger.handle_batch(&decoded.records).await;
        for (id, result) in decoded.ids.iter().zip(&results) {
            match result {
                Err(e) if e.is_retryable() => {
                    debug!(
                        target: "bs.feed.consumer",
                        entry_id = %id,
                        "Feed entry left pending for retry"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "bs.feed.consumer",
                        entry_id = %id,
                        error = %e,
                        "Feed entry failed and will be re-read"
                    );
                }
                Ok(_) => {}
            }
        }

        let failed = decoded.undecodable.len() + results.iter().filter(|r| r.is_err()).count();
        let to_ack = ids_to_ack(decoded.trimmed, decoded.ids, &results);

        let mut acked: usize = 0;
        if !to_ack.is_empty() {
            let start = Instant::now();
            acked = conn
                .xack(&self.settings.stream, &self.settings.group, to_ack.as_slice())
                .await
                .map_err(|e| BsError::Redis(format!("XACK failed: {e}")))?;
            record_redis_latency("xack", start.elapsed());
        }

        Ok(PassSummary {
            read,
            acked,
            failed,
        })
    }
}

/// Sort entries into trimmed, decoded and undecodable, keeping stream order.
fn decode_entries(entries: Vec<FeedEntry>) -> DecodedEntries {
    let mut decoded = DecodedEntries::default();

    for entry in entries {
        // Pending entries whose data was trimmed come back with no fields.
        if entry.fields.is_empty() {
            decoded.trimmed.push(entry.id);
            continue;
        }

        match FeedRecord::from_fields(&entry.fields) {
            Ok(record) => {
                decoded.ids.push(entry.id);
                decoded.records.push(record);
            }
            Err(e) => decoded.undecodable.push((entry.id, e)),
        }
    }

    decoded
}

/// Entry IDs to acknowledge: every trimmed entry plus each record the trigger
/// handled. Failed records stay pending for the next sweep.
fn ids_to_ack(
    trimmed: Vec<String>,
    ids: Vec<String>,
    results: &[Result<RecordOutcome, BsError>],
) -> Vec<String> {
    let handled = ids
        .into_iter()
        .zip(results)
        .filter(|(_, result)| result.is_ok())
        .map(|(id, _)| id);

    trimmed.into_iter().chain(handled).collect()
}

/// Split an `XAUTOCLAIM` reply into the next cursor and the claimed entries.
///
/// Entries deleted from the stream come back with nil fields on Redis 6.2;
/// they become field-less entries and are acked as trimmed.
fn parse_autoclaim(reply: &Value) -> Result<(String, Vec<FeedEntry>), BsError> {
    let Value::Array(parts) = reply else {
        return Err(BsError::Redis(format!(
            "Unexpected XAUTOCLAIM reply: {reply:?}"
        )));
    };

    let cursor = parts
        .first()
        .and_then(|value| redis::from_redis_value::<String>(value).ok())
        .ok_or_else(|| BsError::Redis("XAUTOCLAIM reply has no cursor".to_string()))?;

    let mut entries = Vec::new();
    if let Some(Value::Array(claimed)) = parts.get(1) {
        for item in claimed {
            let Value::Array(pair) = item else {
                continue;
            };
            let Some(id) = pair
                .first()
                .and_then(|value| redis::from_redis_value::<String>(value).ok())
            else {
                continue;
            };
            let fields = match pair.get(1) {
                Some(Value::Array(flat)) => flat_fields(flat),
                _ => HashMap::new(),
            };
            entries.push(FeedEntry { id, fields });
        }
    }

    Ok((cursor, entries))
}

/// Pair up a flat `[name, value, name, value, ...]` field list.
fn flat_fields(flat: &[Value]) -> HashMap<String, String> {
    flat.chunks(2)
        .filter_map(|pair| match pair {
            [name, value] => Some((
                redis::from_redis_value::<String>(name).ok()?,
                redis::from_redis_value::<String>(value).ok()?,
            )),
            _ => None,
        })
        .collect()
}

/// Keep the string-valued fields of a stream entry.
fn string_fields(map: &HashMap<String, Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(name, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|text| (name.clone(), text))
        })
        .collect()
}
