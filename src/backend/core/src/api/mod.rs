//! HTTP API.
//!
//! Routes live under `/api`; `/metrics` serves Prometheus text.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/api/health` | liveness |
//! | GET | `/api/templates` | list (eventually consistent) |
//! | POST | `/api/templates` | create |
//! | GET | `/api/templates/:id` | replayed template |
//! | PUT | `/api/templates/:id` | update |
//! | DELETE | `/api/templates/:id` | archive |
//! | GET | `/api/templates/:id/history` | audit trail |
//! | POST | `/api/templates/preview` | render typst to PDF |

pub mod dto;
mod handlers;
pub mod middleware;

use axum::{
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::telemetry::MetricsRegistry;
use crate::templates::TemplateService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: TemplateService,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(service: TemplateService, metrics: MetricsRegistry) -> Self {
        Self { service, metrics }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the API router.
///
/// An empty `allowed_origins` allows any origin.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let templates = Router::new()
        .route("/", get(handlers::list_templates).post(handlers::create_template))
        .route("/preview", post(handlers::preview))
        .route(
            "/:id",
            get(handlers::get_template)
                .put(handlers::update_template)
                .delete(handlers::archive_template),
        )
        .route("/:id/history", get(handlers::template_history));

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/templates", templates)
        .route_layer(axum_middleware::from_fn(middleware::track_metrics))
        .layer(axum_middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}
