//! Template list projection.
//!
//! A [`ProjectionRunner`] polls the global log and folds template events into
//! flat [`TemplateSummary`] entries held by a [`ReadModel`]. Each tick works on
//! a copy of the current map, checkpoints it together with the new position,
//! and only then swaps it in, so readers never see a half-applied batch and a
//! restart resumes exactly where the last completed tick stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ErrorCode, PdfgenError, Result};

use super::checkpoint::{CheckpointStore, ProjectionCheckpoint};
use super::event::{Event, StoredEvent, TemplateEvent};
use super::store::EventStore;

// =============================================================================
// Read Model
// =============================================================================

/// One row of the template list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type SummaryMap = HashMap<Uuid, TemplateSummary>;

/// Shared, swap-on-write map of template summaries.
///
/// Cloning shares the same underlying model.
#[derive(Clone, Default)]
pub struct ReadModel {
    inner: Arc<RwLock<Arc<SummaryMap>>>,
    halted: Arc<RwLock<Option<ErrorCode>>>,
}

impl ReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All summaries, newest first. The returned vector is an independent copy.
    pub fn get_all(&self) -> Vec<TemplateSummary> {
        sorted(&self.current())
    }

    pub fn get(&self, id: Uuid) -> Option<TemplateSummary> {
        self.current().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<SummaryMap> {
        Arc::clone(&self.inner.read())
    }

    pub(crate) fn replace(&self, next: SummaryMap) {
        *self.inner.write() = Arc::new(next);
    }

    /// Error code the feeding projection stopped with. While set, the model no
    /// longer follows the event log.
    pub fn halted(&self) -> Option<ErrorCode> {
        *self.halted.read()
    }

    pub(crate) fn mark_halted(&self, code: ErrorCode) {
        *self.halted.write() = Some(code);
    }
}

fn sorted(map: &SummaryMap) -> Vec<TemplateSummary> {
    let mut summaries: Vec<TemplateSummary> = map.values().cloned().collect();
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    summaries
}

// =============================================================================
// Fold
// =============================================================================

/// Apply one stored event to the summary map. Events of other aggregate types
/// are ignored.
fn fold(map: &mut SummaryMap, stored: &StoredEvent) -> Result<()> {
    if stored.aggregate_type != TemplateEvent::AGGREGATE_TYPE {
        return Ok(());
    }

    let id = stored.aggregate_id;
    match stored.decode::<TemplateEvent>()? {
        TemplateEvent::Created(e) => {
            map.insert(
                id,
                TemplateSummary {
                    id,
                    name: e.name,
                    description: e.description,
                    archived: false,
                    created_at: e.created_at,
                    updated_at: e.created_at,
                },
            );
        }
        TemplateEvent::Updated(e) => {
            let summary = summary_mut(map, stored)?;
            summary.name = e.name;
            summary.description = e.description;
            summary.updated_at = e.updated_at;
        }
        TemplateEvent::Archived(e) => {
            let summary = summary_mut(map, stored)?;
            summary.archived = true;
            summary.updated_at = e.archived_at;
        }
    }
    Ok(())
}

fn summary_mut<'a>(map: &'a mut SummaryMap, stored: &StoredEvent) -> Result<&'a mut TemplateSummary> {
    map.get_mut(&stored.aggregate_id).ok_or_else(|| {
        PdfgenError::stream_corrupted(format!(
            "{} at sequence {} for template {} that was never created",
            stored.kind, stored.global_sequence, stored.aggregate_id
        ))
    })
}

// =============================================================================
// Runner
// =============================================================================

/// Result of a single polling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Events consumed by this tick.
    pub folded: usize,
    /// Position after the tick.
    pub position: u64,
}

struct RunnerState {
    position: u64,
    restored: bool,
}

/// Polls the event log and maintains a [`ReadModel`].
pub struct ProjectionRunner {
    name: String,
    store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    read_model: ReadModel,
    batch_size: usize,
    // Held for a whole tick, which keeps the runner a single consumer.
    state: tokio::sync::Mutex<RunnerState>,
    position: AtomicU64,
}

impl ProjectionRunner {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        read_model: ReadModel,
        batch_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            checkpoints,
            read_model,
            batch_size: batch_size.max(1),
            state: tokio::sync::Mutex::new(RunnerState {
                position: 0,
                restored: false,
            }),
            position: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last global sequence folded into the read model.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn read_model(&self) -> &ReadModel {
        &self.read_model
    }

    /// Current summaries, newest first.
    pub fn snapshot(&self) -> Vec<TemplateSummary> {
        self.read_model.get_all()
    }

    /// Fold everything appended since the last position.
    ///
    /// The first call restores the stored checkpoint. A tick that finds no new
    /// events writes nothing.
    #[instrument(skip(self), fields(projection = %self.name))]
    pub async fn tick(&self) -> Result<TickOutcome> {
        let mut state = self.state.lock().await;
        if !state.restored {
            self.restore(&mut state).await?;
        }

        let mut batch = self.store.load_since(state.position, self.batch_size).await?;
        if batch.is_empty() {
            return Ok(TickOutcome {
                folded: 0,
                position: state.position,
            });
        }

        let mut next: SummaryMap = (*self.read_model.current()).clone();
        let mut position = state.position;
        let mut folded = 0;

        loop {
            for event in &batch {
                fold(&mut next, event)?;
                position = event.global_sequence;
                folded += 1;
            }
            if batch.len() < self.batch_size {
                break;
            }
            batch = self.store.load_since(position, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
        }

        let checkpoint = ProjectionCheckpoint::new(&self.name, position, serde_json::to_value(sorted(&next))?);
        self.checkpoints.save(&checkpoint).await?;

        self.read_model.replace(next);
        state.position = position;
        self.position.store(position, Ordering::Release);

        metrics::counter!("pdfgen_projection_events_folded_total", "projection" => self.name.clone())
            .increment(folded as u64);
        metrics::gauge!("pdfgen_projection_position", "projection" => self.name.clone()).set(position as f64);

        tracing::debug!(folded, position, "Projection tick applied");
        Ok(TickOutcome { folded, position })
    }

    async fn restore(&self, state: &mut RunnerState) -> Result<()> {
        if let Some(checkpoint) = self.checkpoints.load(&self.name).await? {
            let summaries: Vec<TemplateSummary> = serde_json::from_value(checkpoint.state).map_err(|e| {
                PdfgenError::decode(format!("checkpoint '{}' state is unreadable: {}", self.name, e))
            })?;
            self.read_model
                .replace(summaries.into_iter().map(|s| (s.id, s)).collect());
            state.position = checkpoint.position;
            self.position.store(checkpoint.position, Ordering::Release);
            tracing::info!(
                projection = %self.name,
                position = checkpoint.position,
                "Projection restored from checkpoint"
            );
        }
        state.restored = true;
        Ok(())
    }

    /// Tick every `poll_interval` until `cancel` fires.
    ///
    /// Transient failures are logged and retried on the next tick. Integrity
    /// failures end the loop and are returned.
    pub async fn run(&self, cancel: CancellationToken, poll_interval: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            projection = %self.name,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Projection started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(projection = %self.name, position = self.position(), "Projection stopped");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(_) => {}
                Err(e) if e.is_integrity_violation() => {
                    tracing::error!(
                        projection = %self.name,
                        position = self.position(),
                        error = %e,
                        "Projection halted on corrupted event log"
                    );
                    self.read_model.mark_halted(e.code());
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(projection = %self.name, error = %e, "Projection tick failed, retrying");
                }
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration) -> ProjectionHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token, poll_interval).await });
        ProjectionHandle { cancel, task }
    }
}

/// Handle for a spawned projection.
pub struct ProjectionHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ProjectionHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the projection, waiting up to `grace` for the in-flight tick.
    ///
    /// Returns the error the runner stopped with, if any. When the grace period
    /// runs out the task is aborted and the read model may be stale.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PdfgenError::internal(format!(
                "projection task failed: {}",
                join_error
            ))),
            Err(_) => {
                task.abort();
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Projection did not stop within grace period, aborted; read model may be stale"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemoryCheckpointStore, InMemoryEventStore, TemplateAggregate, TemplateContent};

    async fn create(store: &InMemoryEventStore, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let agg = TemplateAggregate::create(id, name, "", TemplateContent::default()).unwrap();
        store
            .append(id, agg.expected_version(), agg.uncommitted_new_events().unwrap())
            .await
            .unwrap();
        id
    }

    fn runner(store: Arc<InMemoryEventStore>, batch_size: usize) -> ProjectionRunner {
        ProjectionRunner::new(
            "templates",
            store,
            Arc::new(InMemoryCheckpointStore::new()),
            ReadModel::new(),
            batch_size,
        )
    }

    #[tokio::test]
    async fn test_empty_tick_is_noop() {
        let runner = runner(InMemoryEventStore::shared(), 10);
        let outcome = runner.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome { folded: 0, position: 0 });
        assert!(runner.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_tick_drains_across_batches() {
        let store = InMemoryEventStore::shared();
        for i in 0..5 {
            create(&store, &format!("t{}", i)).await;
        }
        let runner = runner(store, 2);

        let outcome = runner.tick().await.unwrap();
        assert_eq!(outcome.folded, 5);
        assert_eq!(runner.position(), 5);
        assert_eq!(runner.read_model().len(), 5);
    }

    #[tokio::test]
    async fn test_snapshot_is_newest_first() {
        let store = InMemoryEventStore::shared();
        create(&store, "first").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        create(&store, "second").await;
        let runner = runner(store, 10);
        runner.tick().await.unwrap();

        let names: Vec<String> = runner.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_read_model_copies_are_independent() {
        let model = ReadModel::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut map = HashMap::new();
        map.insert(
            id,
            TemplateSummary {
                id,
                name: "a".into(),
                description: String::new(),
                archived: false,
                created_at: now,
                updated_at: now,
            },
        );
        model.replace(map);

        let mut copy = model.get_all();
        copy[0].name = "changed".into();
        assert_eq!(model.get(id).unwrap().name, "a");
    }
}
