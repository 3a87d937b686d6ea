//! Aggregate trait and the template aggregate.
//!
//! Aggregates are rebuilt from their own ordered event stream. Commands do
//! not touch storage: they record events into an uncommitted buffer which the
//! caller appends with the pre-command version as the expectation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PdfgenError, Result};

use super::event::{
    Event, NewEvent, StoredEvent, TemplateArchived, TemplateContent, TemplateCreated,
    TemplateEvent, TemplateUpdated,
};
use super::patch;

// =============================================================================
// Aggregate Trait
// =============================================================================

/// An aggregate reconstructed from a sequence of stored events.
pub trait Aggregate: Sized {
    type Event: Event;

    /// Empty state for a stream that has no events yet.
    fn empty(id: Uuid) -> Self;

    fn id(&self) -> Uuid;

    /// Number of events applied so far.
    fn version(&self) -> u64;

    /// Fold one event into state, advancing the version by one.
    ///
    /// A failure means committed history cannot be applied; callers abort the
    /// whole reconstruction.
    fn apply(&mut self, event: &Self::Event) -> Result<()>;

    /// Rebuild from history, checking that versions are gapless and that every
    /// event belongs to this stream.
    fn replay(id: Uuid, history: &[StoredEvent]) -> Result<Self> {
        let mut aggregate = Self::empty(id);
        for stored in history {
            if stored.aggregate_id != id {
                return Err(PdfgenError::stream_corrupted(format!(
                    "event {} belongs to aggregate {}, not {}",
                    stored.global_sequence, stored.aggregate_id, id
                )));
            }
            if stored.version != aggregate.version() + 1 {
                return Err(PdfgenError::stream_corrupted(format!(
                    "aggregate {} expected version {}, found {}",
                    id,
                    aggregate.version() + 1,
                    stored.version
                )));
            }
            let event = stored.decode::<Self::Event>()?;
            aggregate.apply(&event)?;
        }
        Ok(aggregate)
    }
}

// =============================================================================
// Template Aggregate
// =============================================================================

/// Read-only view of a template's reconstructed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub content: TemplateContent,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Template state rebuilt from its events, plus the events recorded by
/// commands on this instance that have not been appended yet.
#[derive(Debug, Clone)]
pub struct TemplateAggregate {
    id: Uuid,
    name: String,
    description: String,
    content: TemplateContent,
    archived: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    uncommitted: Vec<TemplateEvent>,
}

impl Aggregate for TemplateAggregate {
    type Event = TemplateEvent;

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            name: String::new(),
            description: String::new(),
            content: TemplateContent::default(),
            archived: false,
            created_at: None,
            updated_at: None,
            version: 0,
            uncommitted: Vec::new(),
        }
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, event: &TemplateEvent) -> Result<()> {
        match event {
            TemplateEvent::Created(e) => {
                if self.is_created() {
                    return Err(PdfgenError::stream_corrupted(format!(
                        "template {} received TemplateCreated at version {}",
                        self.id,
                        self.version + 1
                    )));
                }
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.content = e.content.clone();
                self.created_at = Some(e.created_at);
                self.updated_at = Some(e.created_at);
            }
            TemplateEvent::Updated(e) => {
                self.ensure_created(TemplateEvent::UPDATED)?;
                let current = patch::serialize_content(&self.content)?;
                let next = patch::apply(&current, &e.content_patch)?;
                // Only touch state once the patched content decodes.
                self.content = patch::deserialize_content(&next)?;
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.updated_at = Some(e.updated_at);
            }
            TemplateEvent::Archived(e) => {
                self.ensure_created(TemplateEvent::ARCHIVED)?;
                self.archived = true;
                self.updated_at = Some(e.archived_at);
            }
        }
        self.version += 1;
        Ok(())
    }
}

impl TemplateAggregate {
    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a new template stream with a single `TemplateCreated`.
    pub fn create(
        id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        content: TemplateContent,
    ) -> Result<Self> {
        let name = validate_name(name.into())?;
        let mut aggregate = Self::empty(id);
        aggregate.record(TemplateEvent::Created(TemplateCreated {
            name,
            description: description.into(),
            content,
            created_at: Utc::now(),
        }))?;
        Ok(aggregate)
    }

    /// Record a `TemplateUpdated` carrying a patch from the current content.
    pub fn update(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        new_content: &TemplateContent,
    ) -> Result<()> {
        self.ensure_exists()?;
        let name = validate_name(name.into())?;
        let old_text = patch::serialize_content(&self.content)?;
        let new_text = patch::serialize_content(new_content)?;

        self.record(TemplateEvent::Updated(TemplateUpdated {
            name,
            description: description.into(),
            content_patch: patch::diff(&old_text, &new_text),
            updated_at: Utc::now(),
        }))
    }

    /// Archive the template. Already archived templates record nothing.
    pub fn archive(&mut self) -> Result<()> {
        self.ensure_exists()?;
        if self.archived {
            tracing::debug!(template_id = %self.id, "Template already archived, nothing recorded");
            return Ok(());
        }
        self.record(TemplateEvent::Archived(TemplateArchived {
            archived_at: Utc::now(),
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event buffer
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an event and keep it for the next append.
    pub fn record(&mut self, event: TemplateEvent) -> Result<()> {
        self.apply(&event)?;
        self.uncommitted.push(event);
        Ok(())
    }

    /// Events recorded since load, in order.
    pub fn uncommitted(&self) -> &[TemplateEvent] {
        &self.uncommitted
    }

    /// Encode the uncommitted events for `EventStore::append`.
    pub fn uncommitted_new_events(&self) -> Result<Vec<NewEvent>> {
        self.uncommitted.iter().map(Event::to_new_event).collect()
    }

    /// Drain the uncommitted events, leaving the buffer empty.
    pub fn take_uncommitted(&mut self) -> Vec<TemplateEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Forget the uncommitted events once they have been appended.
    pub fn clear(&mut self) {
        self.uncommitted.clear();
    }

    /// The stream version the uncommitted events must be appended on top of.
    pub fn expected_version(&self) -> u64 {
        self.version - self.uncommitted.len() as u64
    }

    /// Rebuild state as of `version`, ignoring later events.
    pub fn replay_until(id: Uuid, history: &[StoredEvent], version: u64) -> Result<Self> {
        let end = history
            .iter()
            .position(|e| e.version > version)
            .unwrap_or(history.len());
        Self::replay(id, &history[..end])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn content(&self) -> &TemplateContent {
        &self.content
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    /// Snapshot of the current state. `None` before `TemplateCreated`.
    pub fn to_template(&self) -> Option<Template> {
        let created_at = self.created_at?;
        Some(Template {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            content: self.content.clone(),
            archived: self.archived,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            version: self.version,
        })
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(PdfgenError::template_not_found(self.id))
        }
    }

    fn ensure_created(&self, kind: &str) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(PdfgenError::stream_corrupted(format!(
                "template {} received {} before TemplateCreated",
                self.id, kind
            )))
        }
    }
}

fn validate_name(name: String) -> Result<String> {
    if name.trim().is_empty() {
        return Err(PdfgenError::validation("Template name is required"));
    }
    Ok(name)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::event::TemplateGrid;
    use serde_json::json;

    /// Turn recorded events into stored records the way a store would.
    fn stored(id: Uuid, events: &[TemplateEvent], first_version: u64) -> Vec<StoredEvent> {
        events
            .iter()
            .enumerate()
            .map(|(i, e)| StoredEvent {
                aggregate_type: TemplateEvent::AGGREGATE_TYPE.to_string(),
                aggregate_id: id,
                version: first_version + i as u64,
                global_sequence: first_version + i as u64,
                kind: e.kind().to_string(),
                payload: e.encode().unwrap(),
                recorded_at: e.occurred_at(),
            })
            .collect()
    }

    fn content_with(text: &str) -> TemplateContent {
        TemplateContent {
            grid: TemplateGrid::default(),
            components: vec![json!({"id": "c1", "type": "text", "props": {"text": text}})],
            variables: vec![],
        }
    }

    #[test]
    fn test_create_records_one_event() {
        let id = Uuid::new_v4();
        let agg = TemplateAggregate::create(id, "Invoice", "desc", content_with("a")).unwrap();

        assert_eq!(agg.version(), 1);
        assert_eq!(agg.expected_version(), 0);
        assert_eq!(agg.uncommitted().len(), 1);
        assert_eq!(agg.uncommitted()[0].kind(), "TemplateCreated");
        assert_eq!(agg.name(), "Invoice");
        assert!(!agg.is_archived());
    }

    #[test]
    fn test_create_requires_name() {
        let err = TemplateAggregate::create(Uuid::new_v4(), "   ", "", TemplateContent::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_update_records_patch_not_content() {
        let id = Uuid::new_v4();
        let mut agg = TemplateAggregate::create(id, "Invoice", "", content_with("a")).unwrap();
        agg.clear();

        agg.update("Invoice v2", "new", &content_with("b")).unwrap();

        assert_eq!(agg.expected_version(), 1);
        match &agg.uncommitted()[0] {
            TemplateEvent::Updated(e) => {
                assert!(e.content_patch.contains("@@"));
                assert!(e.content_patch.contains("+"));
                assert_eq!(e.name, "Invoice v2");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(agg.content(), &content_with("b"));
    }

    #[test]
    fn test_update_requires_name() {
        let mut agg = TemplateAggregate::create(Uuid::new_v4(), "Invoice", "", content_with("a")).unwrap();
        let err = agg.update("", "", &content_with("b")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(agg.uncommitted().len(), 1);
    }

    #[test]
    fn test_commands_on_missing_template() {
        let mut agg = TemplateAggregate::empty(Uuid::new_v4());
        assert_eq!(agg.update("x", "", &TemplateContent::default()).unwrap_err().code(), ErrorCode::TemplateNotFound);
        assert_eq!(agg.archive().unwrap_err().code(), ErrorCode::TemplateNotFound);
        assert!(agg.to_template().is_none());
    }

    #[test]
    fn test_replay_determinism() {
        let id = Uuid::new_v4();
        let mut agg = TemplateAggregate::create(id, "T", "", content_with("v0")).unwrap();
        for i in 1..=5 {
            agg.update(format!("T{}", i), format!("d{}", i), &content_with(&format!("v{}", i))).unwrap();
        }
        agg.archive().unwrap();

        let history = stored(id, agg.uncommitted(), 1);
        let replayed = TemplateAggregate::replay(id, &history).unwrap();

        assert_eq!(replayed.version(), 7);
        assert_eq!(replayed.content(), &content_with("v5"));
        assert_eq!(replayed.name(), "T5");
        assert_eq!(replayed.description(), "d5");
        assert!(replayed.is_archived());
        assert!(replayed.uncommitted().is_empty());
        assert_eq!(replayed.to_template(), agg.to_template());
    }

    #[test]
    fn test_replay_without_archive() {
        let id = Uuid::new_v4();
        let mut agg = TemplateAggregate::create(id, "T", "", content_with("v0")).unwrap();
        agg.update("T", "", &content_with("v1")).unwrap();

        let replayed = TemplateAggregate::replay(id, &stored(id, agg.uncommitted(), 1)).unwrap();
        assert!(!replayed.is_archived());
        assert_eq!(replayed.content(), &content_with("v1"));
    }

    #[test]
    fn test_replay_until_version() {
        let id = Uuid::new_v4();
        let mut agg = TemplateAggregate::create(id, "T", "", content_with("v0")).unwrap();
        agg.update("T", "", &content_with("v1")).unwrap();
        agg.update("T", "", &content_with("v2")).unwrap();

        let history = stored(id, agg.uncommitted(), 1);
        let at_two = TemplateAggregate::replay_until(id, &history, 2).unwrap();
        assert_eq!(at_two.version(), 2);
        assert_eq!(at_two.content(), &content_with("v1"));
    }

    #[test]
    fn test_archive_active_records_event() {
        let mut agg = TemplateAggregate::create(Uuid::new_v4(), "T", "", content_with("a")).unwrap();
        agg.clear();

        agg.archive().unwrap();

        assert!(agg.is_archived());
        assert_eq!(agg.uncommitted().len(), 1);
        assert_eq!(agg.version(), 2);
    }

    #[test]
    fn test_archive_already_archived_is_noop() {
        let mut agg = TemplateAggregate::create(Uuid::new_v4(), "T", "", content_with("a")).unwrap();
        agg.archive().unwrap();
        agg.clear();

        agg.archive().unwrap();

        assert!(agg.is_archived());
        assert!(agg.uncommitted().is_empty());
        assert_eq!(agg.version(), 2);
    }

    #[test]
    fn test_replay_aborts_on_corrupt_patch() {
        let id = Uuid::new_v4();
        let created = TemplateEvent::Created(TemplateCreated {
            name: "T".into(),
            description: String::new(),
            content: content_with("a"),
            created_at: Utc::now(),
        });
        let bad_update = TemplateEvent::Updated(TemplateUpdated {
            name: "T".into(),
            description: String::new(),
            content_patch: "--- original\n+++ modified\n@@ -1,3 +1,3 @@\n missing\n-context\n+lines\n here\n".into(),
            updated_at: Utc::now(),
        });

        let err = TemplateAggregate::replay(id, &stored(id, &[created, bad_update], 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptPatch);
    }

    #[test]
    fn test_replay_aborts_on_undecodable_result() {
        let id = Uuid::new_v4();
        let base = content_with("a");
        let text = patch::serialize_content(&base).unwrap();
        let created = TemplateEvent::Created(TemplateCreated {
            name: "T".into(),
            description: String::new(),
            content: base,
            created_at: Utc::now(),
        });
        let update = TemplateEvent::Updated(TemplateUpdated {
            name: "T".into(),
            description: String::new(),
            content_patch: patch::diff(&text, "not json at all\n"),
            updated_at: Utc::now(),
        });

        let err = TemplateAggregate::replay(id, &stored(id, &[created, update], 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
    }

    #[test]
    fn test_replay_rejects_gaps_and_misplaced_created() {
        let id = Uuid::new_v4();
        let agg = TemplateAggregate::create(id, "T", "", content_with("a")).unwrap();

        let gapped = stored(id, agg.uncommitted(), 2);
        assert_eq!(
            TemplateAggregate::replay(id, &gapped).unwrap_err().code(),
            ErrorCode::EventStreamCorrupted
        );

        let doubled = stored(id, &[agg.uncommitted()[0].clone(), agg.uncommitted()[0].clone()], 1);
        assert_eq!(
            TemplateAggregate::replay(id, &doubled).unwrap_err().code(),
            ErrorCode::EventStreamCorrupted
        );
    }

    #[test]
    fn test_replay_rejects_unknown_kind() {
        let id = Uuid::new_v4();
        let agg = TemplateAggregate::create(id, "T", "", content_with("a")).unwrap();
        let mut history = stored(id, agg.uncommitted(), 1);
        history.push(StoredEvent {
            kind: "TemplateRenamed".to_string(),
            version: 2,
            global_sequence: 2,
            ..history[0].clone()
        });

        let err = TemplateAggregate::replay(id, &history).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEventKind);
    }
}
