use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::checkpoint::{validate_thread_id, Checkpoint, CheckpointError, CheckpointStore};

/// One JSON-lines file per thread under `root`.
///
/// A put is a single newline-terminated append followed by `sync_data`. A line
/// without its trailing newline is a write that never completed; readers skip
/// it and the next put truncates it away.
///
/// Each thread's lock also caches the tail of its file, so consecutive puts
/// append without re-reading the history. The cache is trusted only while the
/// file length still matches it.
pub struct FileCheckpointStore {
    root: PathBuf,
    threads: Mutex<HashMap<String, Arc<Mutex<Option<Tail>>>>>,
}

#[derive(Clone, Copy, Debug)]
struct Tail {
    sequence: u64,
    len: u64,
}

struct History {
    checkpoints: Vec<Checkpoint>,
    clean_len: u64,
    file_len: u64,
}

impl FileCheckpointStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|error| {
            CheckpointError::Storage(format!("create {}: {error}", root.display()))
        })?;
        Ok(Self { root, threads: Mutex::new(HashMap::new()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{thread_id}.jsonl"))
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<Option<Tail>>> {
        let mut threads = self.threads.lock().await;
        Arc::clone(threads.entry(thread_id.to_string()).or_default())
    }

    async fn current_len(path: &Path) -> Result<u64, CheckpointError> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(0),
            Err(error) => Err(CheckpointError::Storage(format!("stat {}: {error}", path.display()))),
        }
    }

    /// Last sequence plus the clean and actual file lengths, from the cache
    /// when it still matches the file.
    async fn tail(&self, path: &Path, cached: Option<Tail>) -> Result<(u64, u64, u64), CheckpointError> {
        if let Some(tail) = cached {
            if Self::current_len(path).await? == tail.len {
                return Ok((tail.sequence, tail.len, tail.len));
            }
        }
        let history = self.read_history(path).await?;
        let sequence = history.checkpoints.last().map(|last| last.sequence).unwrap_or(0);
        Ok((sequence, history.clean_len, history.file_len))
    }

    async fn read_history(&self, path: &Path) -> Result<History, CheckpointError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(History { checkpoints: Vec::new(), clean_len: 0, file_len: 0 });
            }
            Err(error) => {
                return Err(CheckpointError::Storage(format!("read {}: {error}", path.display())));
            }
        };

        let clean_len = raw.rfind('\n').map(|index| index + 1).unwrap_or(0);
        let mut checkpoints = Vec::new();
        for line in raw[..clean_len].lines().filter(|line| !line.trim().is_empty()) {
            let checkpoint = serde_json::from_str::<Checkpoint>(line).map_err(|error| {
                CheckpointError::Decode(format!("{}: {error}", path.display()))
            })?;
            checkpoints.push(checkpoint);
        }

        Ok(History { checkpoints, clean_len: clean_len as u64, file_len: raw.len() as u64 })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, thread_id: &str, state: Value) -> Result<Checkpoint, CheckpointError> {
        validate_thread_id(thread_id)?;
        let lock = self.thread_lock(thread_id).await;
        let mut cached = lock.lock().await;

        let path = self.path_for(thread_id);
        let (last_sequence, clean_len, file_len) = self.tail(&path, *cached).await?;
        let checkpoint = Checkpoint::new(thread_id, last_sequence + 1, state);

        let mut line = serde_json::to_string(&checkpoint)
            .map_err(|error| CheckpointError::Storage(format!("encode checkpoint: {error}")))?;
        line.push('\n');

        let storage = |error: std::io::Error| {
            CheckpointError::Storage(format!("write {}: {error}", path.display()))
        };
        let mut file =
            OpenOptions::new().create(true).append(true).open(&path).await.map_err(storage)?;
        if clean_len < file_len {
            file.set_len(clean_len).await.map_err(storage)?;
        }
        // forget the tail until the write is durable
        *cached = None;
        file.write_all(line.as_bytes()).await.map_err(storage)?;
        file.sync_data().await.map_err(storage)?;
        *cached = Some(Tail { sequence: checkpoint.sequence, len: clean_len + line.len() as u64 });

        Ok(checkpoint)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        let history = self.read_history(&self.path_for(thread_id)).await?;
        Ok(history.checkpoints.into_iter().last())
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;
        Ok(self.read_history(&self.path_for(thread_id)).await?.checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::FileCheckpointStore;
    use crate::checkpoint::{CheckpointError, CheckpointStore};

    #[tokio::test]
    async fn checkpoints_survive_reopening_the_store() {
        let dir = TempDir::new().expect("tempdir");
        {
            let store = FileCheckpointStore::open(dir.path()).await.expect("open");
            store.put("session_a", json!({"turn": 1})).await.expect("put 1");
            store.put("session_a", json!({"turn": 2})).await.expect("put 2");
        }

        let reopened = FileCheckpointStore::open(dir.path()).await.expect("reopen");
        let latest = reopened.get_latest("session_a").await.expect("read").expect("present");
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.state, json!({"turn": 2}));
        assert!(reopened.get_latest("session_b").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn torn_trailing_write_is_ignored_and_repaired() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileCheckpointStore::open(dir.path()).await.expect("open");
        store.put("t1", json!({"turn": 1})).await.expect("put");

        let path = dir.path().join("t1.jsonl");
        let mut raw = std::fs::read_to_string(&path).expect("read file");
        raw.push_str("{\"thread_id\":\"t1\",\"checkp");
        std::fs::write(&path, raw).expect("simulate torn write");

        let latest = store.get_latest("t1").await.expect("read").expect("present");
        assert_eq!(latest.sequence, 1);

        let next = store.put("t1", json!({"turn": 2})).await.expect("put after torn write");
        assert_eq!(next.sequence, 2);
        assert_eq!(store.list("t1").await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn path_like_thread_ids_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileCheckpointStore::open(dir.path()).await.expect("open");
        let error = store.put("../escape", json!({})).await.expect_err("must reject");
        assert!(matches!(error, CheckpointError::InvalidThreadId(_)));
    }

    #[tokio::test]
    async fn sequence_continues_across_puts_and_reopening() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileCheckpointStore::open(dir.path()).await.expect("open");
        for turn in 1..=3 {
            let checkpoint = store.put("t2", json!({ "turn": turn })).await.expect("put");
            assert_eq!(checkpoint.sequence, turn);
        }
        drop(store);

        let reopened = FileCheckpointStore::open(dir.path()).await.expect("reopen");
        let next = reopened.put("t2", json!({"turn": 4})).await.expect("put after reopen");
        assert_eq!(next.sequence, 4);
        let sequences: Vec<u64> =
            reopened.list("t2").await.expect("list").into_iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn puts_notice_a_file_rewritten_behind_the_cache() {
        let dir = TempDir::new().expect("tempdir");
        let writer = FileCheckpointStore::open(dir.path()).await.expect("open");
        let other = FileCheckpointStore::open(dir.path()).await.expect("second handle");
        writer.put("t3", json!({"turn": 1})).await.expect("put 1");
        other.put("t3", json!({"turn": 2})).await.expect("put 2 from other handle");

        let next = writer.put("t3", json!({"turn": 3})).await.expect("put 3");
        assert_eq!(next.sequence, 3);
        assert_eq!(writer.list("t3").await.expect("list").len(), 3);
    }
}
