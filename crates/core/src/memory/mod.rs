//! Per-session bounded conversation history.
//!
//! Sessions are isolated from each other and every operation on one session is
//! serialized behind that session's lock, so concurrent appends never interleave
//! or lose messages. Messages trimmed past capacity are held back until the
//! summary threshold of them has accumulated, then folded into a running summary.

mod summarizer;

pub use summarizer::{DigestSummarizer, Summarizer, SummaryError};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::MemoryConfig;
use crate::domain::conversation::{Message, SessionId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemorySettings {
    /// Maximum messages kept per session.
    pub capacity: usize,
    /// Number of trimmed messages that triggers a summary of them.
    pub summary_threshold: usize,
    /// Sessions untouched for longer than this are dropped by `evict_idle`.
    pub idle_ttl: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self { capacity: 20, summary_threshold: 15, idle_ttl: Duration::from_secs(60 * 60) }
    }
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            capacity: config.max_history,
            summary_threshold: config.summary_threshold,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
        }
    }
}

struct SessionMemory {
    messages: VecDeque<Message>,
    summary: Option<String>,
    /// Trimmed messages not yet folded into `summary`, oldest first.
    evicted: Vec<Message>,
    last_touched: Instant,
}

impl SessionMemory {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            summary: None,
            evicted: Vec::new(),
            last_touched: Instant::now(),
        }
    }
}

pub struct SessionMemoryManager {
    settings: MemorySettings,
    summarizer: Arc<dyn Summarizer>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionMemory>>>>,
}

impl SessionMemoryManager {
    pub fn new(settings: MemorySettings, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { settings, summarizer, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn with_defaults() -> Self {
        Self::new(MemorySettings::default(), Arc::new(DigestSummarizer::default()))
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    async fn session(&self, session_id: &SessionId) -> Arc<Mutex<SessionMemory>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SessionMemory::new()))),
        )
    }

    async fn existing(&self, session_id: &SessionId) -> Option<Arc<Mutex<SessionMemory>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Appends one message, trimming the oldest entries past capacity.
    pub async fn append(&self, session_id: &SessionId, message: Message) {
        self.append_all(session_id, vec![message]).await;
    }

    /// Appends messages in order under a single hold of the session lock.
    pub async fn append_all(&self, session_id: &SessionId, messages: Vec<Message>) {
        let handle = self.session(session_id).await;
        let mut memory = handle.lock().await;
        memory.last_touched = Instant::now();
        memory.messages.extend(messages);

        let overflow = memory.messages.len().saturating_sub(self.settings.capacity);
        let trimmed: Vec<Message> = memory.messages.drain(..overflow).collect();
        memory.evicted.extend(trimmed);

        let threshold = self.settings.summary_threshold;
        if threshold == 0 || memory.evicted.len() < threshold {
            return;
        }

        let previous = memory.summary.clone();
        let result = self.summarizer.summarize(previous.as_deref(), &memory.evicted).await;
        match result {
            Ok(summary) => {
                debug!(
                    event_name = "memory.summary.updated",
                    session_id = %session_id,
                    folded = memory.evicted.len(),
                );
                memory.summary = Some(summary);
                memory.evicted.clear();
            }
            Err(error) => {
                // keep at most one window of pending messages while the summarizer is down
                let excess = memory.evicted.len().saturating_sub(self.settings.capacity.max(threshold));
                memory.evicted.drain(..excess);
                warn!(
                    event_name = "memory.summary.failed",
                    session_id = %session_id,
                    pending = memory.evicted.len(),
                    error = %error,
                    "summary will be retried on the next append"
                );
            }
        }
    }

    /// Snapshot of the session's messages, oldest first. Unknown sessions are empty.
    pub async fn get_messages(&self, session_id: &SessionId) -> Vec<Message> {
        match self.existing(session_id).await {
            Some(handle) => {
                let mut memory = handle.lock().await;
                memory.last_touched = Instant::now();
                memory.messages.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub async fn get_summary(&self, session_id: &SessionId) -> Option<String> {
        let handle = self.existing(session_id).await?;
        let memory = handle.lock().await;
        memory.summary.clone()
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Drops the session entirely; later reads see an empty history.
    pub async fn clear(&self, session_id: &SessionId) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn clear_all(&self) {
        self.sessions.write().await.clear();
    }

    /// Removes sessions idle past the configured TTL. Sessions busy with an
    /// in-flight operation are skipped.
    pub async fn evict_idle(&self) -> usize {
        let ttl = self.settings.idle_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(memory) => memory.last_touched.elapsed() <= ttl,
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(event_name = "memory.sessions.evicted", evicted, remaining = sessions.len());
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{MemorySettings, SessionMemoryManager, Summarizer, SummaryError};
    use crate::domain::conversation::{Message, SessionId};
    use crate::memory::DigestSummarizer;

    fn sid(value: &str) -> SessionId {
        SessionId(value.to_string())
    }

    fn manager(capacity: usize, threshold: usize) -> SessionMemoryManager {
        SessionMemoryManager::new(
            MemorySettings { capacity, summary_threshold: threshold, idle_ttl: Duration::from_secs(3600) },
            Arc::new(DigestSummarizer::default()),
        )
    }

    #[tokio::test]
    async fn unknown_session_reads_empty() {
        let memory = SessionMemoryManager::with_defaults();
        assert!(memory.get_messages(&sid("session_x")).await.is_empty());
        assert!(memory.get_summary(&sid("session_x")).await.is_none());
        assert_eq!(memory.session_count().await, 0);
    }

    #[tokio::test]
    async fn history_is_trimmed_to_capacity_keeping_newest() {
        let memory = manager(3, 100);
        let session = sid("session_a");
        for index in 0..5 {
            memory.append(&session, Message::user(format!("m{index}"))).await;
        }

        let contents: Vec<String> =
            memory.get_messages(&session).await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn summary_waits_for_threshold_of_trimmed_messages() {
        let memory = manager(4, 3);
        let session = sid("session_b");
        for index in 0..6 {
            memory.append(&session, Message::user(format!("m{index}"))).await;
        }
        // two trimmed so far; a full window alone never triggers a summary
        assert!(memory.get_summary(&session).await.is_none());

        memory.append(&session, Message::assistant("m6")).await;
        let summary = memory.get_summary(&session).await.expect("summary past threshold");
        assert!(summary.starts_with("Conversation has 3 messages (3 from user, 0 from assistant)"));
        assert!(summary.contains("\"m2\""));

        let contents: Vec<String> =
            memory.get_messages(&session).await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn later_summaries_cover_only_newly_trimmed_messages() {
        let memory = manager(2, 2);
        let session = sid("session_d");
        for index in 0..4 {
            memory.append(&session, Message::user(format!("m{index}"))).await;
        }
        let first = memory.get_summary(&session).await.expect("first summary");
        assert!(first.starts_with("Conversation has 2 messages"));

        memory.append(&session, Message::user("m4")).await;
        assert_eq!(memory.get_summary(&session).await.as_deref(), Some(first.as_str()));

        memory.append(&session, Message::user("m5")).await;
        let second = memory.get_summary(&session).await.expect("second summary");
        assert!(second.starts_with("Conversation has 4 messages (4 from user, 0 from assistant)"));
        assert!(second.contains("\"m3\""));
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_clear_is_per_session() {
        let memory = manager(10, 100);
        memory.append(&sid("session_a"), Message::user("hello a")).await;
        memory.append(&sid("session_b"), Message::user("hello b")).await;

        assert!(memory.clear(&sid("session_a")).await);
        assert!(memory.get_messages(&sid("session_a")).await.is_empty());
        assert_eq!(memory.get_messages(&sid("session_b")).await.len(), 1);
        assert_eq!(memory.session_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_session_lose_nothing() {
        let memory = Arc::new(manager(1_000, 10_000));
        let session = sid("session_busy");
        let mut handles = Vec::new();
        for index in 0..50 {
            let memory = Arc::clone(&memory);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                memory.append(&session, Message::user(format!("m{index}"))).await;
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(memory.get_messages(&session).await.len(), 50);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let memory = SessionMemoryManager::new(
            MemorySettings { capacity: 10, summary_threshold: 5, idle_ttl: Duration::ZERO },
            Arc::new(DigestSummarizer::default()),
        );
        memory.append(&sid("session_old"), Message::user("hi")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(memory.evict_idle().await, 1);
        assert_eq!(memory.session_count().await, 0);
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _previous: Option<&str>, _evicted: &[Message]) -> Result<String, SummaryError> {
            Err(SummaryError("model offline".to_string()))
        }
    }

    #[tokio::test]
    async fn summarizer_failure_does_not_break_appends() {
        let memory = SessionMemoryManager::new(
            MemorySettings { capacity: 2, summary_threshold: 1, idle_ttl: Duration::from_secs(60) },
            Arc::new(FailingSummarizer),
        );
        let session = sid("session_c");
        for word in ["one", "two", "three", "four"] {
            memory.append(&session, Message::user(word)).await;
        }

        assert!(memory.get_summary(&session).await.is_none());
        let contents: Vec<String> =
            memory.get_messages(&session).await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["three", "four"]);
    }
}
