//! PostgreSQL event store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{PdfgenError, Result};

use super::event::{NewEvent, StoredEvent};
use super::store::{ensure_non_empty, record_append_metrics, record_conflict_metric, EventStore};

/// Event store backed by the `events` table.
///
/// Versions are protected by `UNIQUE (aggregate_id, version)`. Every row also
/// records the writing transaction id so that `load_since` can hold back rows
/// while an older transaction might still commit a lower sequence.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64> {
        ensure_non_empty(aggregate_id, &events)?;

        let mut tx = self.pool.begin().await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *tx)
        .await?;
        let current = current as u64;

        if current != expected_version {
            record_conflict_metric();
            return Err(PdfgenError::concurrency_conflict(aggregate_id, expected_version, current));
        }

        let mut stored = Vec::with_capacity(events.len());
        for (i, event) in events.into_iter().enumerate() {
            let version = current + i as u64 + 1;
            let inserted = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
                r#"
                INSERT INTO events (aggregate_id, aggregate_type, version, kind, payload, recorded_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                RETURNING global_sequence, recorded_at
                "#,
            )
            .bind(aggregate_id)
            .bind(&event.aggregate_type)
            .bind(version as i64)
            .bind(&event.kind)
            .bind(&event.payload)
            .fetch_one(&mut *tx)
            .await;

            let (global_sequence, recorded_at) = match inserted {
                Ok(row) => row,
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    // A racing writer committed the same version first.
                    record_conflict_metric();
                    return Err(PdfgenError::concurrency_conflict(
                        aggregate_id,
                        expected_version,
                        expected_version + 1,
                    ));
                }
                Err(e) => return Err(e.into()),
            };

            stored.push(StoredEvent {
                aggregate_type: event.aggregate_type,
                aggregate_id,
                version,
                global_sequence: global_sequence as u64,
                kind: event.kind,
                payload: event.payload,
                recorded_at,
            });
        }

        tx.commit().await?;

        record_append_metrics(&stored);
        let new_version = current + stored.len() as u64;
        tracing::debug!(aggregate_id = %aggregate_id, new_version, "Events appended");
        Ok(new_version)
    }

    #[instrument(skip(self))]
    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT global_sequence, aggregate_id, aggregate_type, version, kind, payload, recorded_at
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(PdfgenError::template_not_found(aggregate_id));
        }
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    #[instrument(skip(self))]
    async fn load_since(&self, position: u64, limit: usize) -> Result<Vec<StoredEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT global_sequence, aggregate_id, aggregate_type, version, kind, payload, recorded_at
            FROM events
            WHERE global_sequence > $1
              AND transaction_id < pg_snapshot_xmin(pg_current_snapshot())
            ORDER BY global_sequence ASC
            LIMIT $2
            "#,
        )
        .bind(position as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    #[instrument(skip(self))]
    async fn current_version(&self, aggregate_id: Uuid) -> Result<u64> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version as u64)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    global_sequence: i64,
    aggregate_id: Uuid,
    aggregate_type: String,
    version: i64,
    kind: String,
    payload: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            version: row.version as u64,
            global_sequence: row.global_sequence as u64,
            kind: row.kind,
            payload: row.payload,
            recorded_at: row.recorded_at,
        }
    }
}
