//! Append-only event log.
//!
//! [`EventStore`] is the storage boundary for aggregates and projections.
//! [`InMemoryEventStore`] backs tests and database-less development; the
//! PostgreSQL implementation lives in [`super::postgres`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{PdfgenError, Result};

use super::event::{NewEvent, StoredEvent};

/// Durable, ordered, append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` on top of `expected_version`, returning the new version.
    ///
    /// Either every event is written with consecutive versions or none is.
    /// Fails with `ConcurrencyConflict` when the stream has moved on.
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64>;

    /// All events of one aggregate in version order. `TemplateNotFound` if none.
    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>>;

    /// Events with `global_sequence > position`, in sequence order, at most
    /// `limit` of them.
    async fn load_since(&self, position: u64, limit: usize) -> Result<Vec<StoredEvent>>;

    /// Current stream version, 0 when the aggregate has no events.
    async fn current_version(&self, aggregate_id: Uuid) -> Result<u64>;
}

pub(crate) fn ensure_non_empty(aggregate_id: Uuid, events: &[NewEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(PdfgenError::validation("Cannot append an empty event batch")
            .with_context("aggregateId", aggregate_id.to_string()));
    }
    Ok(())
}

pub(crate) fn record_append_metrics(events: &[StoredEvent]) {
    for event in events {
        metrics::counter!("pdfgen_events_appended_total", "kind" => event.kind.clone()).increment(1);
    }
}

pub(crate) fn record_conflict_metric() {
    metrics::counter!("pdfgen_concurrency_conflicts_total").increment(1);
}

// =============================================================================
// In-memory store
// =============================================================================

/// Event store held entirely in process memory.
///
/// Streams live in a `DashMap`, so version checks on unrelated aggregates do
/// not contend. Global sequence numbers are assigned under a short mutex over
/// the global log, taken while the stream's map entry is held, so the log is
/// always gap-free in sequence order.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: DashMap<Uuid, Vec<StoredEvent>>,
    log: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of events across all streams.
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert pre-built records as-is, bypassing version and sequence checks.
    ///
    /// Only for seeding logs that commands cannot produce, such as events of
    /// an unknown kind.
    #[doc(hidden)]
    pub fn insert_raw(&self, event: StoredEvent) {
        let mut stream = self.streams.entry(event.aggregate_id).or_default();
        let mut log = self.log.lock();
        stream.push(event.clone());
        log.push(event);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64> {
        ensure_non_empty(aggregate_id, &events)?;

        // A conflicting append must not leave an empty stream behind.
        let mut stream = match self.streams.entry(aggregate_id) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(_) if expected_version != 0 => {
                record_conflict_metric();
                return Err(PdfgenError::concurrency_conflict(aggregate_id, expected_version, 0));
            }
            Entry::Vacant(entry) => entry.insert(Vec::new()),
        };
        let current = stream.len() as u64;
        if current != expected_version {
            record_conflict_metric();
            return Err(PdfgenError::concurrency_conflict(aggregate_id, expected_version, current));
        }

        let recorded_at = Utc::now();
        let mut log = self.log.lock();
        let mut next_sequence = log.last().map(|e| e.global_sequence).unwrap_or(0);

        let stored: Vec<StoredEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                next_sequence += 1;
                StoredEvent {
                    aggregate_type: event.aggregate_type,
                    aggregate_id,
                    version: current + i as u64 + 1,
                    global_sequence: next_sequence,
                    kind: event.kind,
                    payload: event.payload,
                    recorded_at,
                }
            })
            .collect();

        log.extend(stored.iter().cloned());
        drop(log);
        stream.extend(stored.iter().cloned());
        let new_version = stream.len() as u64;
        drop(stream);

        record_append_metrics(&stored);
        tracing::debug!(
            aggregate_id = %aggregate_id,
            new_version,
            count = stored.len(),
            "Events appended"
        );
        Ok(new_version)
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>> {
        match self.streams.get(&aggregate_id) {
            Some(stream) if !stream.is_empty() => Ok(stream.clone()),
            _ => Err(PdfgenError::template_not_found(aggregate_id)),
        }
    }

    async fn load_since(&self, position: u64, limit: usize) -> Result<Vec<StoredEvent>> {
        let log = self.log.lock();
        let start = log.partition_point(|e| e.global_sequence <= position);
        Ok(log[start..].iter().take(limit).cloned().collect())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<u64> {
        Ok(self
            .streams
            .get(&aggregate_id)
            .map(|stream| stream.len() as u64)
            .unwrap_or(0))
    }
}
