//! Incremental log aggregation: parse only the bytes appended since the
//! stored offset, fold them into daily/hourly counters, and commit the
//! counters and the new offset together. The offset never moves ahead of
//! bytes that have not been aggregated, so a failed pass re-reads the same
//! bytes and a retried pass of identical bytes is additive-safe.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use murmur_db::entities::{client_metrics, clients, experiments, server_metrics};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::CoreError;
use crate::offsets::{LogOffsetTracker, OffsetKey};

pub const GRANULARITY_DAILY: &str = "daily";
pub const GRANULARITY_HOURLY: &str = "hourly";

/// What one aggregation pass did. Malformed lines are counted here, not
/// raised: a bad line is skipped, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub bytes_read: u64,
    pub lines_parsed: u64,
    pub lines_skipped: u64,
    pub offset_reset: bool,
}

impl RefreshSummary {
    pub fn merge(&mut self, other: &RefreshSummary) {
        self.bytes_read += other.bytes_read;
        self.lines_parsed += other.lines_parsed;
        self.lines_skipped += other.lines_skipped;
        self.offset_reset |= other.offset_reset;
    }
}

struct LogEntry {
    ts: DateTime<Utc>,
    key: String,
    duration: f64,
}

fn parse_timestamp(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(s) = v.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc));
    }
    // Numeric unix seconds (possibly fractional).
    let secs = v.as_f64()?;
    DateTime::from_timestamp_millis((secs * 1000.0) as i64)
}

/// One JSON object per line: a timestamp, an identifying field (`path` for
/// server logs, `method_name` for client logs) and a numeric duration.
fn parse_line(line: &str, key_field: &str) -> Option<LogEntry> {
    let v: serde_json::Value = serde_json::from_str(line).ok()?;
    Some(LogEntry {
        ts: parse_timestamp(v.get("timestamp")?)?,
        key: v.get(key_field)?.as_str()?.to_string(),
        duration: v.get("duration")?.as_f64()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    day: NaiveDate,
    hour: Option<i32>,
    key: String,
}

struct Accum {
    count: i64,
    total_duration: f64,
    min_ts: DateTime<Utc>,
    max_ts: DateTime<Utc>,
}

impl Accum {
    fn fold(&mut self, e: &LogEntry) {
        self.count += 1;
        self.total_duration += e.duration;
        self.min_ts = self.min_ts.min(e.ts);
        self.max_ts = self.max_ts.max(e.ts);
    }

    fn seed(e: &LogEntry) -> Self {
        Self {
            count: 1,
            total_duration: e.duration,
            min_ts: e.ts,
            max_ts: e.ts,
        }
    }
}

/// Bucket every entry twice: a daily row (hour = None) and an hourly row.
fn bucketize(entries: &[LogEntry]) -> HashMap<BucketKey, Accum> {
    let mut buckets: HashMap<BucketKey, Accum> = HashMap::new();
    for e in entries {
        let day = e.ts.date_naive();
        for hour in [None, Some(e.ts.hour() as i32)] {
            let key = BucketKey {
                day,
                hour,
                key: e.key.clone(),
            };
            match buckets.get_mut(&key) {
                Some(acc) => acc.fold(e),
                None => {
                    buckets.insert(key, Accum::seed(e));
                }
            }
        }
    }
    buckets
}

struct Chunk {
    data: Vec<u8>,
    start: u64,
    reset: bool,
}

pub struct LogMetricsAggregator {
    db: Arc<DatabaseConnection>,
    offsets: Arc<LogOffsetTracker>,
    config: OrchestratorConfig,
}

impl LogMetricsAggregator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        offsets: Arc<LogOffsetTracker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            offsets,
            config,
        }
    }

    /// Aggregate everything appended to the experiment's server log since
    /// the last pass, keyed by endpoint path.
    pub async fn update_server_metrics(
        &self,
        experiment_id: Uuid,
    ) -> Result<RefreshSummary, CoreError> {
        let key = OffsetKey::server(experiment_id);
        let _guard = self.offsets.lock(key).await;

        experiments::Entity::find_by_id(experiment_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownExperiment(experiment_id))?;

        let path = self.config.server_log_path(experiment_id);
        let Some(chunk) = self.read_new_bytes(key, &path).await? else {
            return Ok(RefreshSummary::default());
        };

        let (entries, summary, new_offset) = consume(&chunk, "path");
        if chunk.data.is_empty() {
            return Ok(summary);
        }

        let buckets = bucketize(&entries);
        let txn = self.db.begin().await?;

        // The experiment may have been deleted while we were reading; abort
        // with no partial metrics commit.
        if experiments::Entity::find_by_id(experiment_id)
            .one(&txn)
            .await?
            .is_none()
        {
            txn.rollback().await?;
            return Err(CoreError::StaleWrite {
                entity: "experiment",
                id: experiment_id,
            });
        }

        for (bucket, acc) in &buckets {
            upsert_server_bucket(&txn, experiment_id, bucket, acc).await?;
        }
        self.offsets
            .advance_offset(&txn, key, &path.to_string_lossy(), new_offset)
            .await?;
        txn.commit().await?;

        tracing::debug!(
            %experiment_id,
            bytes = summary.bytes_read,
            parsed = summary.lines_parsed,
            skipped = summary.lines_skipped,
            "server metrics refreshed"
        );
        Ok(summary)
    }

    /// Same mechanics for a client driver's log, keyed by method name.
    pub async fn update_client_metrics(&self, client_id: Uuid) -> Result<RefreshSummary, CoreError> {
        let client = clients::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownClient(client_id))?;
        let experiment_id = client.experiment_id;

        let key = OffsetKey::client(experiment_id, client_id);
        let _guard = self.offsets.lock(key).await;

        let path = self.config.client_log_path(experiment_id, client_id);
        let Some(chunk) = self.read_new_bytes(key, &path).await? else {
            return Ok(RefreshSummary::default());
        };

        let (entries, summary, new_offset) = consume(&chunk, "method_name");
        if chunk.data.is_empty() {
            return Ok(summary);
        }

        let buckets = bucketize(&entries);
        let txn = self.db.begin().await?;

        if clients::Entity::find_by_id(client_id)
            .one(&txn)
            .await?
            .is_none()
        {
            txn.rollback().await?;
            return Err(CoreError::StaleWrite {
                entity: "client",
                id: client_id,
            });
        }

        for (bucket, acc) in &buckets {
            upsert_client_bucket(&txn, experiment_id, client_id, bucket, acc).await?;
        }
        self.offsets
            .advance_offset(&txn, key, &path.to_string_lossy(), new_offset)
            .await?;
        txn.commit().await?;

        Ok(summary)
    }

    /// Read from the stored offset to EOF. Missing file or nothing past the
    /// offset means "nothing new" (None), never an error. A file smaller
    /// than the stored offset was rotated: persist an offset reset
    /// immediately and read from the start.
    async fn read_new_bytes(
        &self,
        key: OffsetKey,
        path: &Path,
    ) -> Result<Option<Chunk>, CoreError> {
        let stored = self.offsets.get_offset(self.db.as_ref(), key).await?;

        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let size = meta.len();

        let mut start = stored;
        let mut reset = false;
        if size < stored {
            tracing::warn!(
                path = %path.display(),
                stored_offset = stored,
                file_size = size,
                "log file shrank since last read; resetting offset"
            );
            self.offsets
                .reset_offset(self.db.as_ref(), key, &path.to_string_lossy())
                .await?;
            start = 0;
            reset = true;
        }

        if size == start {
            return Ok(if reset {
                Some(Chunk {
                    data: Vec::new(),
                    start,
                    reset,
                })
            } else {
                None
            });
        }

        let mut f = tokio::fs::File::open(path).await?;
        f.seek(SeekFrom::Start(start)).await?;
        let mut data = Vec::with_capacity((size - start) as usize);
        f.read_to_end(&mut data).await?;

        Ok(Some(Chunk { data, start, reset }))
    }
}

/// Split the chunk into complete lines and parse them. A trailing partial
/// line (no newline yet) is left for the next pass: the returned offset
/// stops at the last complete line.
fn consume(chunk: &Chunk, key_field: &str) -> (Vec<LogEntry>, RefreshSummary, u64) {
    let consumed = chunk
        .data
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    let text = String::from_utf8_lossy(&chunk.data[..consumed]);
    let mut entries = Vec::new();
    let mut skipped = 0u64;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line, key_field) {
            Some(e) => entries.push(e),
            None => skipped += 1,
        }
    }

    let summary = RefreshSummary {
        bytes_read: consumed as u64,
        lines_parsed: entries.len() as u64,
        lines_skipped: skipped,
        offset_reset: chunk.reset,
    };
    (entries, summary, chunk.start + consumed as u64)
}

fn granularity(hour: Option<i32>) -> &'static str {
    match hour {
        None => GRANULARITY_DAILY,
        Some(_) => GRANULARITY_HOURLY,
    }
}

async fn upsert_server_bucket(
    txn: &DatabaseTransaction,
    experiment_id: Uuid,
    bucket: &BucketKey,
    acc: &Accum,
) -> Result<(), CoreError> {
    let mut q = server_metrics::Entity::find()
        .filter(server_metrics::Column::ExperimentId.eq(experiment_id))
        .filter(server_metrics::Column::Granularity.eq(granularity(bucket.hour)))
        .filter(server_metrics::Column::Day.eq(bucket.day))
        .filter(server_metrics::Column::Path.eq(bucket.key.as_str()));
    q = match bucket.hour {
        Some(h) => q.filter(server_metrics::Column::Hour.eq(h)),
        None => q.filter(server_metrics::Column::Hour.is_null()),
    };

    match q.one(txn).await? {
        Some(existing) => {
            let call_count = existing.call_count + acc.count;
            let total_duration = existing.total_duration + acc.total_duration;
            let min_ts = existing.min_ts.min(acc.min_ts.into());
            let max_ts = existing.max_ts.max(acc.max_ts.into());
            let mut active: server_metrics::ActiveModel = existing.into();
            active.call_count = Set(call_count);
            active.total_duration = Set(total_duration);
            active.min_ts = Set(min_ts);
            active.max_ts = Set(max_ts);
            active.update(txn).await?;
        }
        None => {
            server_metrics::ActiveModel {
                id: Set(Uuid::new_v4()),
                experiment_id: Set(experiment_id),
                granularity: Set(granularity(bucket.hour).to_string()),
                day: Set(bucket.day),
                hour: Set(bucket.hour),
                path: Set(bucket.key.clone()),
                call_count: Set(acc.count),
                total_duration: Set(acc.total_duration),
                min_ts: Set(acc.min_ts.into()),
                max_ts: Set(acc.max_ts.into()),
            }
            .insert(txn)
            .await?;
        }
    }
    Ok(())
}

async fn upsert_client_bucket(
    txn: &DatabaseTransaction,
    experiment_id: Uuid,
    client_id: Uuid,
    bucket: &BucketKey,
    acc: &Accum,
) -> Result<(), CoreError> {
    let mut q = client_metrics::Entity::find()
        .filter(client_metrics::Column::ClientId.eq(client_id))
        .filter(client_metrics::Column::Granularity.eq(granularity(bucket.hour)))
        .filter(client_metrics::Column::Day.eq(bucket.day))
        .filter(client_metrics::Column::MethodName.eq(bucket.key.as_str()));
    q = match bucket.hour {
        Some(h) => q.filter(client_metrics::Column::Hour.eq(h)),
        None => q.filter(client_metrics::Column::Hour.is_null()),
    };

    match q.one(txn).await? {
        Some(existing) => {
            let call_count = existing.call_count + acc.count;
            let total_duration = existing.total_duration + acc.total_duration;
            let min_ts = existing.min_ts.min(acc.min_ts.into());
            let max_ts = existing.max_ts.max(acc.max_ts.into());
            let mut active: client_metrics::ActiveModel = existing.into();
            active.call_count = Set(call_count);
            active.total_duration = Set(total_duration);
            active.min_ts = Set(min_ts);
            active.max_ts = Set(max_ts);
            active.update(txn).await?;
        }
        None => {
            client_metrics::ActiveModel {
                id: Set(Uuid::new_v4()),
                client_id: Set(client_id),
                experiment_id: Set(experiment_id),
                granularity: Set(granularity(bucket.hour).to_string()),
                day: Set(bucket.day),
                hour: Set(bucket.hour),
                method_name: Set(bucket.key.clone()),
                call_count: Set(acc.count),
                total_duration: Set(acc.total_duration),
                min_ts: Set(acc.min_ts.into()),
                max_ts: Set(acc.max_ts.into()),
            }
            .insert(txn)
            .await?;
        }
    }
    Ok(())
}
