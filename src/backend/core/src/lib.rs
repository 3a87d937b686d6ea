#![allow(clippy::result_large_err)]
//! # pdfgen core
//!
//! Event-sourced backend for document templates rendered to PDF.
//!
//! ## Architecture
//!
//! - **Events**: append-only log, template aggregate, content patches
//! - **Projection**: polling read model for the template list
//! - **Templates**: command/query service and the typst render pipeline
//! - **API**: axum routes under `/api`
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod telemetry;
pub mod templates;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, PdfgenError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{ErrorCode, PdfgenError, Result};
    pub use crate::events::{
        Aggregate, CheckpointStore, Event, EventStore, InMemoryCheckpointStore,
        InMemoryEventStore, NewEvent, PgCheckpointStore, PgEventStore, ProjectionHandle,
        ProjectionRunner, ReadModel, StoredEvent, Template, TemplateAggregate, TemplateContent,
        TemplateEvent, TemplateSummary,
    };
    pub use crate::templates::{TemplateService, TypstRenderer};
}
