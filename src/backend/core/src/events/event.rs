//! Event definitions for event sourcing.
//!
//! This module provides:
//! - `StoredEvent`, the record shape the event store hands back
//! - `NewEvent`, the append input before version/sequence assignment
//! - The `Event` trait tying a closed event enum to its storage encoding
//! - Template content and the three template domain events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PdfgenError, Result};

// =============================================================================
// Stored Records
// =============================================================================

/// An event as recorded in the log.
///
/// `version` is gapless per aggregate starting at 1; `global_sequence` is
/// strictly increasing across the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub version: u64,
    pub global_sequence: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decode the payload into the aggregate's event type.
    pub fn decode<E: Event>(&self) -> Result<E> {
        if self.aggregate_type != E::AGGREGATE_TYPE {
            return Err(PdfgenError::stream_corrupted(format!(
                "event {} of aggregate {} has type '{}', expected '{}'",
                self.version,
                self.aggregate_id,
                self.aggregate_type,
                E::AGGREGATE_TYPE
            )));
        }
        E::decode(&self.kind, &self.payload)
    }
}

/// An event waiting to be appended. The store assigns version and sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub aggregate_type: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// Event Trait
// =============================================================================

/// A closed set of domain events for one aggregate type.
///
/// Encoding is `(kind, payload)`; decoding goes through a kind match that
/// yields `UnknownEventKind` for anything unregistered.
pub trait Event: Sized + Send + Sync + std::fmt::Debug {
    /// Aggregate type recorded alongside every event of this set.
    const AGGREGATE_TYPE: &'static str;

    /// Discriminant written to the `kind` column.
    fn kind(&self) -> &'static str;

    /// When the change happened.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Serialize the variant's payload (without the kind).
    fn encode(&self) -> Result<serde_json::Value>;

    /// Rebuild an event from its stored kind and payload.
    fn decode(kind: &str, payload: &serde_json::Value) -> Result<Self>;

    /// Wrap into an append-ready record.
    fn to_new_event(&self) -> Result<NewEvent> {
        Ok(NewEvent {
            aggregate_type: Self::AGGREGATE_TYPE.to_string(),
            kind: self.kind().to_string(),
            payload: self.encode()?,
            occurred_at: self.occurred_at(),
        })
    }
}

// =============================================================================
// Template Content
// =============================================================================

/// Page grid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateGrid {
    pub columns: u32,
    pub gap: u32,
}

impl Default for TemplateGrid {
    fn default() -> Self {
        Self { columns: 12, gap: 16 }
    }
}

/// Structured template content. Components and variables are opaque here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateContent {
    #[serde(default)]
    pub grid: TemplateGrid,
    #[serde(default)]
    pub components: Vec<serde_json::Value>,
    #[serde(default)]
    pub variables: Vec<serde_json::Value>,
}

// =============================================================================
// Domain Events - Template Events
// =============================================================================

/// Event: a template was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCreated {
    pub name: String,
    pub description: String,
    pub content: TemplateContent,
    pub created_at: DateTime<Utc>,
}

/// Event: a template's metadata and/or content changed.
///
/// Content travels as a patch against the previous serialized content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateUpdated {
    pub name: String,
    pub description: String,
    pub content_patch: String,
    pub updated_at: DateTime<Utc>,
}

/// Event: a template was archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateArchived {
    pub archived_at: DateTime<Utc>,
}

/// All template events.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateEvent {
    Created(TemplateCreated),
    Updated(TemplateUpdated),
    Archived(TemplateArchived),
}

impl TemplateEvent {
    pub const CREATED: &'static str = "TemplateCreated";
    pub const UPDATED: &'static str = "TemplateUpdated";
    pub const ARCHIVED: &'static str = "TemplateArchived";
}

impl Event for TemplateEvent {
    const AGGREGATE_TYPE: &'static str = "template";

    fn kind(&self) -> &'static str {
        match self {
            TemplateEvent::Created(_) => Self::CREATED,
            TemplateEvent::Updated(_) => Self::UPDATED,
            TemplateEvent::Archived(_) => Self::ARCHIVED,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TemplateEvent::Created(e) => e.created_at,
            TemplateEvent::Updated(e) => e.updated_at,
            TemplateEvent::Archived(e) => e.archived_at,
        }
    }

    fn encode(&self) -> Result<serde_json::Value> {
        let value = match self {
            TemplateEvent::Created(e) => serde_json::to_value(e)?,
            TemplateEvent::Updated(e) => serde_json::to_value(e)?,
            TemplateEvent::Archived(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    fn decode(kind: &str, payload: &serde_json::Value) -> Result<Self> {
        let event = match kind {
            Self::CREATED => TemplateEvent::Created(decode_payload(kind, payload)?),
            Self::UPDATED => TemplateEvent::Updated(decode_payload(kind, payload)?),
            Self::ARCHIVED => TemplateEvent::Archived(decode_payload(kind, payload)?),
            other => return Err(PdfgenError::unknown_event_kind(Self::AGGREGATE_TYPE, other)),
        };
        Ok(event)
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(kind: &str, payload: &serde_json::Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|e| PdfgenError::decode(format!("invalid {} payload: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn created() -> TemplateEvent {
        TemplateEvent::Created(TemplateCreated {
            name: "Invoice".to_string(),
            description: "Monthly invoice".to_string(),
            content: TemplateContent::default(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_kind_and_encode() {
        let event = created();
        assert_eq!(event.kind(), "TemplateCreated");

        let payload = event.encode().unwrap();
        assert_eq!(payload["name"], "Invoice");
        assert_eq!(payload["content"]["grid"]["columns"], 12);
        assert!(payload.get("kind").is_none());
    }

    #[test]
    fn test_decode_known_kinds() {
        let event = created();
        let decoded = TemplateEvent::decode(event.kind(), &event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);

        let archived = TemplateEvent::Archived(TemplateArchived { archived_at: Utc::now() });
        let decoded = TemplateEvent::decode("TemplateArchived", &archived.encode().unwrap()).unwrap();
        assert_eq!(decoded, archived);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = TemplateEvent::decode("TemplateDeleted", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEventKind);
        assert!(err.internal_message().unwrap().contains("TemplateDeleted"));
    }

    #[test]
    fn test_decode_malformed_payload() {
        let err = TemplateEvent::decode("TemplateUpdated", &serde_json::json!({"name": 3})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
    }

    #[test]
    fn test_stored_event_rejects_foreign_aggregate_type() {
        let event = created();
        let stored = StoredEvent {
            aggregate_type: "invoice".to_string(),
            aggregate_id: Uuid::new_v4(),
            version: 1,
            global_sequence: 1,
            kind: event.kind().to_string(),
            payload: event.encode().unwrap(),
            recorded_at: Utc::now(),
        };
        let err = stored.decode::<TemplateEvent>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventStreamCorrupted);
    }

    #[test]
    fn test_content_defaults_when_fields_missing() {
        let content: TemplateContent = serde_json::from_str("{}").unwrap();
        assert_eq!(content.grid, TemplateGrid { columns: 12, gap: 16 });
        assert!(content.components.is_empty());
    }

    #[test]
    fn test_to_new_event() {
        let event = created();
        let new_event = event.to_new_event().unwrap();
        assert_eq!(new_event.aggregate_type, "template");
        assert_eq!(new_event.kind, "TemplateCreated");
        assert_eq!(new_event.occurred_at, event.occurred_at());
    }
}
