//! Projection checkpoints: the last folded position together with the state
//! folded up to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::Result;

/// Durable resume point for one projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    pub name: String,
    /// Last folded global sequence.
    pub position: u64,
    /// Serialized projection state as of `position`.
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionCheckpoint {
    pub fn new(name: impl Into<String>, position: u64, state: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            position,
            state,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<ProjectionCheckpoint>>;

    /// Replace the checkpoint stored under `checkpoint.name`.
    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, ProjectionCheckpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<ProjectionCheckpoint>> {
        Ok(self.checkpoints.get(name).map(|c| c.clone()))
    }

    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<()> {
        self.checkpoints
            .insert(checkpoint.name.clone(), checkpoint.clone());
        Ok(())
    }
}

/// Checkpoints in the `projection_checkpoints` table, one row per projection.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self))]
    async fn load(&self, name: &str) -> Result<Option<ProjectionCheckpoint>> {
        let row = sqlx::query_as::<_, (String, i64, serde_json::Value, DateTime<Utc>)>(
            "SELECT name, position, state, updated_at FROM projection_checkpoints WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, position, state, updated_at)| ProjectionCheckpoint {
            name,
            position: position as u64,
            state,
            updated_at,
        }))
    }

    #[instrument(skip(self, checkpoint), fields(name = %checkpoint.name, position = checkpoint.position))]
    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projection_checkpoints (name, position, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET position = EXCLUDED.position,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&checkpoint.name)
        .bind(checkpoint.position as i64)
        .bind(&checkpoint.state)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
