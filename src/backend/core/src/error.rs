//! Error handling for pdfgen.
//!
//! This module provides:
//! - A single crate error type carrying a machine-readable [`ErrorCode`]
//! - HTTP status code mapping for API responses
//! - User-facing messages kept separate from internal detail
//! - Severity-based logging and an error counter metric
//!
//! Integrity failures (corrupt patches, undecodable payloads, unknown event
//! kinds) are deliberately opaque to clients: the user message never carries
//! the reason, only the internal message does.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pdfgen_core::error::{PdfgenError, Result};
//!
//! fn rename(name: &str) -> Result<()> {
//!     if name.trim().is_empty() {
//!         return Err(PdfgenError::validation("template name is required"));
//!     }
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for pdfgen operations.
pub type Result<T> = std::result::Result<T, PdfgenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Template / command errors (1000-1099)
    ValidationError,
    TemplateNotFound,
    ConcurrencyConflict,

    // Event log integrity errors (1100-1199)
    CorruptPatch,
    DecodeError,
    UnknownEventKind,
    EventStreamCorrupted,

    // Database errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,

    // Serialization errors (2200-2299)
    SerializationError,

    // Render errors (3000-3099)
    RenderFailed,
    RenderToolUnavailable,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::TemplateNotFound => 1001,
            Self::ConcurrencyConflict => 1002,

            Self::CorruptPatch => 1100,
            Self::DecodeError => 1101,
            Self::UnknownEventKind => 1102,
            Self::EventStreamCorrupted => 1103,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,

            Self::SerializationError => 2200,

            Self::RenderFailed => 3000,
            Self::RenderToolUnavailable => 3001,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::ValidationError | Self::RenderFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TemplateNotFound => StatusCode::NOT_FOUND,
            Self::ConcurrencyConflict => StatusCode::CONFLICT,
            Self::DatabaseConnectionFailed | Self::RenderToolUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::CorruptPatch
            | Self::DecodeError
            | Self::UnknownEventKind
            | Self::EventStreamCorrupted
            | Self::DatabaseError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    ///
    /// A concurrency conflict is retryable by the caller (reload and reapply);
    /// nothing in this crate retries it automatically.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict | Self::DatabaseConnectionFailed
        )
    }

    /// Whether this code signals that committed history cannot be trusted.
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::CorruptPatch
                | Self::DecodeError
                | Self::UnknownEventKind
                | Self::EventStreamCorrupted
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "template",
            1100..=1199 => "integrity",
            2000..=2099 => "database",
            2200..=2299 => "serialization",
            3000..=3099 => "render",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, missing template)
    Low,
    /// Operational issues (conflicts, render failures)
    Medium,
    /// System errors (database failures)
    High,
    /// Corrupted history or unexpected failures
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError | ErrorCode::TemplateNotFound => Self::Low,

            ErrorCode::ConcurrencyConflict
            | ErrorCode::RenderFailed
            | ErrorCode::RenderToolUnavailable => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::CorruptPatch
            | ErrorCode::DecodeError
            | ErrorCode::UnknownEventKind
            | ErrorCode::EventStreamCorrupted
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none() && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for pdfgen.
#[derive(Error, Debug)]
pub struct PdfgenError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for PdfgenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl PdfgenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// No events exist for the requested template.
    pub fn template_not_found(id: Uuid) -> Self {
        Self::new(ErrorCode::TemplateNotFound, format!("Template not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("template", id.to_string()))
    }

    /// The stream moved past `expected` before the append landed.
    pub fn concurrency_conflict(id: Uuid, expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::ConcurrencyConflict,
            format!(
                "Template {} was modified concurrently (expected version {}, found {})",
                id, expected, actual
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("template", id.to_string())
                .with_context("expectedVersion", expected)
                .with_context("actualVersion", actual)
                .with_suggestion("Reload the template and reapply the change"),
        )
    }

    /// A content patch did not match the content it was applied to.
    pub fn corrupt_patch(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CorruptPatch,
            "Template history could not be reconstructed",
            reason,
        )
    }

    /// Stored or reconstructed data did not decode into the expected shape.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::DecodeError,
            "Template history could not be reconstructed",
            reason,
        )
    }

    /// The event log contains a kind this build does not know.
    pub fn unknown_event_kind(aggregate_type: &str, kind: &str) -> Self {
        Self::with_internal(
            ErrorCode::UnknownEventKind,
            "Template history could not be reconstructed",
            format!("unknown event kind '{}' for aggregate type '{}'", kind, aggregate_type),
        )
    }

    /// Events are out of order, misplaced, or belong to another stream.
    pub fn stream_corrupted(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::EventStreamCorrupted,
            "Template history could not be reconstructed",
            reason,
        )
    }

    /// The template source could not be rendered.
    pub fn render_failed(reason: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::RenderFailed, "Template could not be rendered", reason)
    }

    /// The external renderer could not be started.
    pub fn render_unavailable(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::RenderToolUnavailable,
            "PDF rendering is currently unavailable",
            reason,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_integrity_violation(&self) -> bool {
        self.code.is_integrity_violation()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Request failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "pdfgen_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&PdfgenError> for ErrorResponse {
    fn from(error: &PdfgenError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for PdfgenError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.http_status();
        let response = ErrorResponse::from(&self);
        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for PdfgenError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };
        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for PdfgenError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Database migration failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for PdfgenError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DecodeError
        } else {
            ErrorCode::SerializationError
        };
        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for PdfgenError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

impl From<std::io::Error> for PdfgenError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An I/O error occurred", error.to_string())
            .with_source(error)
    }
}
