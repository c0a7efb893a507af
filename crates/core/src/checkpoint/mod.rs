//! Durable snapshots of workflow state, keyed by thread id.
//!
//! Each thread keeps an append-only sequence of checkpoints; the latest one is
//! what a new turn resumes from. Writes are atomic per thread: a reader sees
//! either the previous latest checkpoint or the new one, never a partial write.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    /// 1-based position in the thread's history.
    pub sequence: u64,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, sequence: u64, state: Value) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: Uuid::new_v4().to_string(),
            sequence,
            state,
            created_at: Utc::now(),
        }
    }

    pub fn decode<S: DeserializeOwned>(&self) -> Result<S, CheckpointError> {
        serde_json::from_value(self.state.clone()).map_err(|error| {
            CheckpointError::Decode(format!("checkpoint {}: {error}", self.checkpoint_id))
        })
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint thread id `{0}`")]
    InvalidThreadId(String),
    #[error("checkpoint storage failure: {0}")]
    Storage(String),
    #[error("checkpoint decode failure: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Appends a snapshot and returns it with its assigned sequence.
    async fn put(&self, thread_id: &str, state: Value) -> Result<Checkpoint, CheckpointError>;

    /// Latest snapshot for the thread, `None` when the thread has never been written.
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Full history, oldest first.
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;
}

/// Thread ids become file names and SQL keys; keep them to a conservative charset.
pub fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && !thread_id.starts_with('.')
        && thread_id.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidThreadId(thread_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{validate_thread_id, Checkpoint, CheckpointError};

    #[test]
    fn thread_ids_are_restricted_to_safe_characters() {
        assert!(validate_thread_id("session_0a1b2c").is_ok());
        assert!(validate_thread_id("thread-1.2").is_ok());
        for bad in ["", "../etc/passwd", ".hidden", "a/b", "white space"] {
            assert!(matches!(validate_thread_id(bad), Err(CheckpointError::InvalidThreadId(_))));
        }
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let checkpoint = Checkpoint::new("t1", 1, json!({"value": "not a number"}));

        #[derive(serde::Deserialize)]
        struct Shape {
            #[allow(dead_code)]
            value: u32,
        }

        assert!(matches!(checkpoint.decode::<Shape>(), Err(CheckpointError::Decode(_))));
    }
}
