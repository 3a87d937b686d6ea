//! HTTP middleware: request ids and request metrics.

use axum::{
    extract::{MatchedPath, Request},
    http::header::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::telemetry::RequestDurationHistogram;

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Echo `x-request-id`, generating one when the client sent none.
pub async fn request_id(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        let _ = response.headers_mut().try_insert(REQUEST_ID.clone(), value);
    }
    response
}

/// Record duration and count per route template, e.g. `/api/templates/:id`.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = RequestDurationHistogram::start(req.method().as_str(), &path);

    let response = next.run(req).await;
    timer.finish(response.status().as_u16());
    response
}
