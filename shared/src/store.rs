use crate::prt::status::{Recency, StatusRecord, compare};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use std::num::TryFromIntError;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Upper bound for [`StatusStore::recent`].
pub const MAX_RECENT: i64 = 25;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no status has been recorded yet")]
    NotFound,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("payload compression failed: {0}")]
    Compress(#[from] std::io::Error),
    #[error("payload too large: {0}")]
    PayloadTooLarge(#[from] TryFromIntError),
}

/// Key of the transaction advisory lock serializing [`StatusStore::commit_new`] calls.
const COMMIT_LOCK_KEY: i64 = 0x5052_5453;

/// Result of a guarded commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The current record moved after the caller read it and `record` no longer follows it.
    /// Nothing was written.
    Superseded { current: i64, recency: Recency },
}

/// Decides a commit against the current record as seen under the store's write lock.
pub fn guard_commit(current: Option<&StatusRecord>, record: &StatusRecord) -> CommitOutcome {
    match current.map(|current| (current, compare(current, record))) {
        None | Some((_, Recency::After)) => CommitOutcome::Committed,
        Some((current, recency)) => CommitOutcome::Superseded {
            current: current.timestamp,
            recency,
        },
    }
}

/// Append-only status history with a single "current" marker.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Most recently committed record, or [`StoreError::NotFound`] on a cold start.
    async fn get_current(&self) -> Result<StatusRecord, StoreError>;

    /// Appends `record` to the history and points the current marker at it, atomically.
    ///
    /// Commits are serialized and `record` is compared against the current record inside
    /// the commit, so a concurrent writer that got there first yields
    /// [`CommitOutcome::Superseded`] instead of a regression or a duplicate.
    async fn commit_new(&self, record: &StatusRecord) -> Result<CommitOutcome, StoreError>;

    /// Newest-first history, at most `limit` records (clamped to `1..=MAX_RECENT`).
    async fn recent(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError>;

    /// History with event timestamps inside `[start, end]`, oldest first.
    async fn between(&self, start: i64, end: i64) -> Result<Vec<StatusRecord>, StoreError>;
}

pub fn clamp_recent_limit(limit: i64) -> i64 {
    limit.saturating_abs().clamp(1, MAX_RECENT)
}

/// Returns the bounds in ascending order.
pub fn ordered_bounds(start: i64, end: i64) -> (i64, i64) {
    if start <= end { (start, end) } else { (end, start) }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    state: i32,
    message: String,
    timestamp: i64,
    stations: Vec<String>,
    buses_dispatched: bool,
    duration: Option<String>,
    raw_payload: Vec<u8>,
}

impl TryFrom<StatusRow> for StatusRecord {
    type Error = StoreError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: row.state.into(),
            message: row.message,
            timestamp: row.timestamp,
            stations: row.stations,
            buses_dispatched: row.buses_dispatched,
            duration: row.duration,
            raw_payload: zstd::decode_all(row.raw_payload.as_slice())?,
        })
    }
}

const STATUS_COLUMNS: &str =
    "h.state, h.message, h.timestamp, h.stations, h.buses_dispatched, h.duration, h.raw_payload";

#[derive(Clone)]
pub struct PgStatusStore {
    pool: Pool<Postgres>,
}

impl PgStatusStore {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    #[instrument(skip(self))]
    async fn get_current(&self) -> Result<StatusRecord, StoreError> {
        let row = sqlx::query_as::<_, StatusRow>(&format!(
            r"
            SELECT {STATUS_COLUMNS}
            FROM status_current c
            JOIN status_history h ON h.id = c.history_id
            "
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound)?.try_into()
    }

    #[instrument(skip(self, record), fields(timestamp = record.timestamp))]
    async fn commit_new(&self, record: &StatusRecord) -> Result<CommitOutcome, StoreError> {
        let id = Uuid::now_v7();
        let original_size = i32::try_from(record.raw_payload.len())?;
        let payload_compressed = zstd::encode_all(record.raw_payload.as_slice(), 3)?;
        let recorded_at: DateTime<Utc> = Utc::now();

        let mut tx = self.pool.begin().await?;

        // Held until commit or rollback; also covers the cold start where no marker row
        // exists yet to lock.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(COMMIT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current = sqlx::query_as::<_, StatusRow>(&format!(
            r"
            SELECT {STATUS_COLUMNS}
            FROM status_current c
            JOIN status_history h ON h.id = c.history_id
            FOR UPDATE OF c
            "
        ))
        .fetch_optional(&mut *tx)
        .await?
        .map(StatusRecord::try_from)
        .transpose()?;

        let outcome = guard_commit(current.as_ref(), record);
        if outcome != CommitOutcome::Committed {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            r"
            INSERT INTO status_history (
                id,
                state,
                message,
                timestamp,
                stations,
                buses_dispatched,
                duration,
                raw_payload,
                raw_payload_size,
                recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(id)
        .bind(record.state.code())
        .bind(&record.message)
        .bind(record.timestamp)
        .bind(&record.stations)
        .bind(record.buses_dispatched)
        .bind(&record.duration)
        .bind(payload_compressed)
        .bind(original_size)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO status_current (singleton, history_id, updated_at)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (singleton) DO UPDATE SET
                history_id = EXCLUDED.history_id,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(id)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    #[instrument(skip(self))]
    async fn recent(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError> {
        sqlx::query_as::<_, StatusRow>(&format!(
            r"
            SELECT {STATUS_COLUMNS}
            FROM status_history h
            ORDER BY h.recorded_at DESC, h.id DESC
            LIMIT $1
            "
        ))
        .bind(clamp_recent_limit(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StatusRecord::try_from)
        .collect()
    }

    #[instrument(skip(self))]
    async fn between(&self, start: i64, end: i64) -> Result<Vec<StatusRecord>, StoreError> {
        let (start, end) = ordered_bounds(start, end);
        sqlx::query_as::<_, StatusRow>(&format!(
            r"
            SELECT {STATUS_COLUMNS}
            FROM status_history h
            WHERE h.timestamp BETWEEN $1 AND $2
            ORDER BY h.timestamp, h.recorded_at
            "
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StatusRecord::try_from)
        .collect()
    }
}
