//! Template commands and queries.
//!
//! Writes go load → command → append against the event store. The list query
//! reads the projection's [`ReadModel`] and is eventually consistent; a
//! single-template read replays the aggregate and is always current.

pub mod render;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ErrorCode, PdfgenError, Result};
use crate::events::{
    Aggregate, Event, EventStore, ReadModel, Template, TemplateAggregate, TemplateContent,
    TemplateSummary,
};

pub use render::{placeholders, substitute, TypstRenderer};

/// One entry of a template's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub version: u64,
    pub kind: String,
    pub recorded_at: DateTime<Utc>,
}

/// Command and query entry point for templates.
#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn EventStore>,
    read_model: ReadModel,
    renderer: TypstRenderer,
}

impl TemplateService {
    pub fn new(store: Arc<dyn EventStore>, read_model: ReadModel, renderer: TypstRenderer) -> Self {
        Self {
            store,
            read_model,
            renderer,
        }
    }

    /// Replay the aggregate from its full stream.
    async fn load(&self, id: Uuid) -> Result<TemplateAggregate> {
        let history = self.store.load(id).await?;
        TemplateAggregate::replay(id, &history)
    }

    /// Append whatever the command recorded. Returns the stored version.
    ///
    /// The buffer is drained either way; a failed append leaves the aggregate
    /// ahead of the store and it must be reloaded.
    async fn save(&self, aggregate: &mut TemplateAggregate, expected_version: u64) -> Result<u64> {
        let events = aggregate
            .take_uncommitted()
            .iter()
            .map(Event::to_new_event)
            .collect::<Result<Vec<_>>>()?;
        if events.is_empty() {
            return Ok(aggregate.version());
        }
        self.store.append(aggregate.id(), expected_version, events).await
    }

    #[instrument(skip(self, description, content))]
    pub async fn create(
        &self,
        name: String,
        description: String,
        content: TemplateContent,
    ) -> Result<Template> {
        let id = Uuid::new_v4();
        let mut aggregate = TemplateAggregate::create(id, name, description, content)?;
        let expected = aggregate.expected_version();
        self.save(&mut aggregate, expected).await?;

        tracing::info!(template_id = %id, "Template created");
        snapshot(&aggregate)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Template> {
        snapshot(&self.load(id).await?)
    }

    /// Update name, description and content.
    ///
    /// With `expected_version` the append is checked against the caller's
    /// version instead of the one just loaded.
    #[instrument(skip(self, description, content))]
    pub async fn update(
        &self,
        id: Uuid,
        name: String,
        description: String,
        content: TemplateContent,
        expected_version: Option<u64>,
    ) -> Result<Template> {
        let mut aggregate = self.load(id).await?;
        aggregate.update(name, description, &content)?;
        let expected = expected_version.unwrap_or_else(|| aggregate.expected_version());
        let version = self.save(&mut aggregate, expected).await?;

        tracing::info!(template_id = %id, version, "Template updated");
        snapshot(&aggregate)
    }

    /// Archive a template. Archiving an archived template changes nothing.
    #[instrument(skip(self))]
    pub async fn archive(&self, id: Uuid) -> Result<Template> {
        let mut aggregate = self.load(id).await?;
        aggregate.archive()?;
        let expected = aggregate.expected_version();
        let version = self.save(&mut aggregate, expected).await?;

        tracing::info!(template_id = %id, version, "Template archived");
        snapshot(&aggregate)
    }

    /// Stored events of a template, oldest first.
    #[instrument(skip(self))]
    pub async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
        let events = self.store.load(id).await?;
        Ok(events
            .into_iter()
            .map(|e| HistoryEntry {
                version: e.version,
                kind: e.kind,
                recorded_at: e.recorded_at,
            })
            .collect())
    }

    /// Template state as of `version`.
    #[instrument(skip(self))]
    pub async fn get_at_version(&self, id: Uuid, version: u64) -> Result<Template> {
        let history = self.store.load(id).await?;
        snapshot(&TemplateAggregate::replay_until(id, &history, version)?)
    }

    /// Current list, newest first. May lag the latest writes by one poll interval.
    pub fn list(&self) -> Vec<TemplateSummary> {
        self.read_model.get_all()
    }

    /// Error code the list projection halted with, if it has.
    pub fn projection_halted(&self) -> Option<ErrorCode> {
        self.read_model.halted()
    }

    /// Placeholders in `source` that `variables` leaves unset.
    pub fn missing_variables(source: &str, variables: &HashMap<String, String>) -> Vec<String> {
        placeholders(source)
            .into_iter()
            .filter(|name| !variables.contains_key(name))
            .collect()
    }

    /// Substitute variables into typst source and compile it to PDF.
    #[instrument(skip(self, source, variables), fields(variables = variables.len()))]
    pub async fn to_pdf(&self, source: &str, variables: &HashMap<String, String>) -> Result<Vec<u8>> {
        let missing = Self::missing_variables(source, variables);
        if !missing.is_empty() {
            tracing::debug!(missing = ?missing, "Unset placeholders render empty");
        }
        let document = substitute(source, variables);
        self.renderer.compile(&document).await
    }
}

fn snapshot(aggregate: &TemplateAggregate) -> Result<Template> {
    aggregate
        .to_template()
        .ok_or_else(|| PdfgenError::template_not_found(aggregate.id()))
}
