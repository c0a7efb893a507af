use async_trait::async_trait;
use chrono::Utc;
use concierge_core::checkpoint::{validate_thread_id, Checkpoint, CheckpointError, CheckpointStore};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use super::parse_timestamp;
use crate::DbPool;

/// Checkpoints in the `workflow_checkpoint` table. The sequence is assigned by
/// the insert itself, so concurrent writers to one thread never share a number.
pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn storage(error: sqlx::Error) -> CheckpointError {
    CheckpointError::Storage(error.to_string())
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn put(&self, thread_id: &str, state: Value) -> Result<Checkpoint, CheckpointError> {
        validate_thread_id(thread_id)?;
        let checkpoint_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let state_json = serde_json::to_string(&state)
            .map_err(|error| CheckpointError::Storage(format!("encode state: {error}")))?;

        let sequence: i64 = sqlx::query_scalar(
            "INSERT INTO workflow_checkpoint (checkpoint_id, thread_id, sequence, state_json, created_at)
             SELECT ?1, ?2, COALESCE(MAX(sequence), 0) + 1, ?3, ?4
             FROM workflow_checkpoint
             WHERE thread_id = ?2
             RETURNING sequence",
        )
        .bind(&checkpoint_id)
        .bind(thread_id)
        .bind(state_json)
        .bind(created_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let sequence = u64::try_from(sequence)
            .map_err(|_| CheckpointError::Decode(format!("negative sequence {sequence}")))?;
        Ok(Checkpoint { thread_id: thread_id.to_string(), checkpoint_id, sequence, state, created_at })
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        let row = sqlx::query(
            "SELECT thread_id, checkpoint_id, sequence, state_json, created_at
             FROM workflow_checkpoint
             WHERE thread_id = ?
             ORDER BY sequence DESC
             LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(checkpoint_from_row).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        let rows = sqlx::query(
            "SELECT thread_id, checkpoint_id, sequence, state_json, created_at
             FROM workflow_checkpoint
             WHERE thread_id = ?
             ORDER BY sequence ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(checkpoint_from_row).collect()
    }
}

fn checkpoint_from_row(row: SqliteRow) -> Result<Checkpoint, CheckpointError> {
    let sequence: i64 = row.try_get("sequence").map_err(storage)?;
    let state_json: String = row.try_get("state_json").map_err(storage)?;
    let checkpoint_id: String = row.try_get("checkpoint_id").map_err(storage)?;
    let state = serde_json::from_str(&state_json).map_err(|error| {
        CheckpointError::Decode(format!("checkpoint {checkpoint_id}: {error}"))
    })?;

    Ok(Checkpoint {
        thread_id: row.try_get("thread_id").map_err(storage)?,
        checkpoint_id,
        sequence: u64::try_from(sequence)
            .map_err(|_| CheckpointError::Decode(format!("negative sequence {sequence}")))?,
        state,
        created_at: parse_timestamp("created_at", row.try_get("created_at").map_err(storage)?)
            .map_err(|error| CheckpointError::Decode(error.to_string()))?,
    })
}
