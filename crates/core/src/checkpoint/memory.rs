use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::checkpoint::{validate_thread_id, Checkpoint, CheckpointError, CheckpointStore};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, thread_id: &str, state: Value) -> Result<Checkpoint, CheckpointError> {
        validate_thread_id(thread_id)?;
        let mut threads = self.threads.write().await;
        let history = threads.entry(thread_id.to_string()).or_default();
        let checkpoint = Checkpoint::new(thread_id, history.len() as u64 + 1, state);
        history.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|history| history.last().cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::InMemoryCheckpointStore;
    use crate::checkpoint::CheckpointStore;

    #[tokio::test]
    async fn unknown_thread_has_no_latest_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.get_latest("session_none").await.expect("read").is_none());
        assert!(store.list("session_none").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn latest_reflects_most_recent_put() {
        let store = InMemoryCheckpointStore::new();
        store.put("t1", json!({"turn": 1})).await.expect("first");
        let second = store.put("t1", json!({"turn": 2})).await.expect("second");

        let latest = store.get_latest("t1").await.expect("read").expect("present");
        assert_eq!(latest, second);
        assert_eq!(latest.sequence, 2);
        assert_eq!(store.list("t1").await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_puts_get_distinct_sequences() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut handles = Vec::new();
        for turn in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put("shared", json!({"turn": turn})).await.expect("put").sequence
            }));
        }

        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.expect("join"));
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=16).collect::<Vec<u64>>());
    }
}
