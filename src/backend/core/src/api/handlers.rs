//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, PdfgenError>` so that errors
//! are converted to the right HTTP status by `PdfgenError`'s `IntoResponse`.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use super::dto::{
    CreateTemplateRequest, HistoryResponse, ListTemplatesResponse, PreviewRequest,
    TemplateResponse, UpdateTemplateRequest,
};
use super::AppState;
use crate::error::PdfgenError;

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

/// Liveness plus the template list projection. A halted projection reports
/// 503 because the list no longer follows writes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = match state.service.projection_halted() {
        None => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "projection": {"status": "running"},
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        ),
        Some(code) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "version": env!("CARGO_PKG_VERSION"),
                "projection": {"status": "halted", "errorCode": code},
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        ),
    };
    (status, Json(body))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Template Handlers
// ═══════════════════════════════════════════════════════════════════════════════

/// List from the projection. Newly written templates appear after the next
/// projection tick.
pub async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(ListTemplatesResponse {
        templates: state.service.list(),
    })
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<impl IntoResponse, PdfgenError> {
    let template = state
        .service
        .create(req.name, req.description, req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(TemplateResponse { template })))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, PdfgenError> {
    let template = state.service.get(id).await?;
    Ok(Json(TemplateResponse { template }))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> Result<impl IntoResponse, PdfgenError> {
    let template = state
        .service
        .update(id, req.name, req.description, req.content, req.expected_version)
        .await?;

    Ok(Json(TemplateResponse { template }))
}

pub async fn archive_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, PdfgenError> {
    state.service.archive(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn template_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, PdfgenError> {
    let events = state.service.history(id).await?;
    Ok(Json(HistoryResponse {
        template_id: id,
        events,
    }))
}

pub async fn preview(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<impl IntoResponse, PdfgenError> {
    if req.typst_code.trim().is_empty() {
        return Err(PdfgenError::validation("typstCode is required"));
    }

    let pdf = state.service.to_pdf(&req.typst_code, &req.variables).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"preview.pdf\""),
        ],
        pdf,
    ))
}
