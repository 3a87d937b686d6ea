//! pdfgen server - main entry point.

use std::sync::Arc;

use anyhow::Context;
use pdfgen_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    events::{
        CheckpointStore, EventStore, InMemoryCheckpointStore, InMemoryEventStore,
        PgCheckpointStore, PgEventStore, ProjectionRunner, ReadModel,
    },
    telemetry,
    templates::{TemplateService, TypstRenderer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("PDFGEN_CONFIG_FILE") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::load().context("loading configuration from environment")?,
    };

    let metrics = telemetry::init_telemetry(&config.logging, &config.metrics)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting pdfgen server");

    // Event log and checkpoints: PostgreSQL when configured, otherwise memory.
    let (store, checkpoints, db): (Arc<dyn EventStore>, Arc<dyn CheckpointStore>, Option<Database>) =
        match &config.database {
            Some(db_config) => {
                let db = Database::connect(db_config).await?;
                db.migrate().await?;
                let latency_ms = db.ping().await?;
                tracing::info!(latency_ms, "Connected to database");
                (
                    Arc::new(PgEventStore::new(db.pool().clone())),
                    Arc::new(PgCheckpointStore::new(db.pool().clone())),
                    Some(db),
                )
            }
            None => {
                tracing::warn!("No database configured, events are kept in memory only");
                (
                    Arc::new(InMemoryEventStore::new()),
                    Arc::new(InMemoryCheckpointStore::new()),
                    None,
                )
            }
        };

    let read_model = ReadModel::new();
    let runner = Arc::new(ProjectionRunner::new(
        config.projection.name.clone(),
        store.clone(),
        checkpoints,
        read_model.clone(),
        config.projection.batch_size,
    ));
    let projection = runner.spawn(config.projection.poll_interval);

    let service = TemplateService::new(
        store,
        read_model,
        TypstRenderer::from_config(&config.render),
    );
    let app = api::build_router(AppState::new(service, metrics), &config.server.allowed_origins);

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = projection.shutdown(config.projection.shutdown_grace).await {
        tracing::error!(error = %e, "Projection stopped with an error");
    }
    if let Some(db) = db {
        db.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
