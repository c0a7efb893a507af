//! Generation-service boundary. Provider adapters implement [`LlmClient`];
//! [`OfflineLlmClient`] answers deterministically without any network access.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use concierge_core::config::LlmConfig;
use concierge_core::domain::conversation::{Message, Role};
use tracing::warn;

use crate::classifier::heuristic_classification;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptTask {
    Classification,
    Conversation,
    Faq,
    Escalation,
}

impl PromptTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Conversation => "conversation",
            Self::Faq => "faq",
            Self::Escalation => "escalation",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub task: PromptTask,
    pub system: String,
    pub history: Vec<Message>,
    pub user: String,
}

impl Prompt {
    /// Splits the conversation into prior history and the latest user message.
    pub fn from_messages(task: PromptTask, system: impl Into<String>, messages: &[Message]) -> Self {
        let last_user = messages.iter().rposition(|message| message.role == Role::User);
        let (history, user) = match last_user {
            Some(index) => (messages[..index].to_vec(), messages[index].content.clone()),
            None => (messages.to_vec(), String::new()),
        };
        Self { task, system: system.into(), history, user }
    }

    /// Flat text rendering for completion-style providers.
    pub fn render(&self) -> String {
        let mut rendered = format!("system: {}\n", self.system);
        for message in &self.history {
            rendered.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
        }
        rendered.push_str(&format!("user: {}", self.user));
        rendered
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

/// Bounds every completion by a deadline and retries failed or timed-out
/// attempts up to `max_retries` extra times.
#[derive(Clone)]
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    timeout: Duration,
    max_retries: u32,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration, max_retries: u32) -> Self {
        Self { inner, timeout, max_retries }
    }

    pub fn from_config(inner: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self::new(inner, Duration::from_secs(config.timeout_secs), config.max_retries)
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let attempts = self.max_retries + 1;
        let mut last_error = anyhow!("no completion attempted");
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.timeout, self.inner.complete(prompt)).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(error)) => last_error = error,
                Err(_) => {
                    last_error = anyhow!("completion timed out after {}ms", self.timeout.as_millis())
                }
            }
            warn!(
                event_name = "llm.complete.retry",
                task = prompt.task.as_str(),
                attempt,
                attempts,
                error = %last_error,
                "completion attempt failed"
            );
        }
        Err(last_error.context(format!("{} completion failed after {attempts} attempts", prompt.task.as_str())))
    }
}

#[derive(Clone, Debug, Default)]
pub struct OfflineLlmClient;

#[async_trait]
impl LlmClient for OfflineLlmClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let text = prompt.user.to_ascii_lowercase();
        let reply = match prompt.task {
            PromptTask::Classification => {
                let classification = heuristic_classification(&prompt.user);
                serde_json::json!({
                    "intent": classification.intent.as_str(),
                    "confidence": classification.confidence,
                    "reasoning": classification.reasoning,
                })
                .to_string()
            }
            PromptTask::Conversation => conversation_reply(&text),
            PromptTask::Faq => faq_reply(&text),
            PromptTask::Escalation => "I understand this needs attention from a person. I've flagged \
                 your conversation for our support team and someone will follow up shortly."
                .to_string(),
        };
        Ok(reply)
    }
}

fn conversation_reply(text: &str) -> String {
    let words: Vec<&str> = text
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    if words.iter().any(|word| word.starts_with("thank")) {
        return "You're welcome! Is there anything else I can help you with?".to_string();
    }
    if words.iter().any(|word| matches!(*word, "hello" | "hi" | "hey" | "morning" | "evening")) {
        return "Hello! I'm your shopping assistant. I can search products, place orders and \
                take payments. What can I do for you?"
            .to_string();
    }
    "I'm here to help with products, orders and payments. Try \"show me laptops\" to get started."
        .to_string()
}

fn faq_reply(text: &str) -> String {
    const ANSWERS: &[(&[&str], &str)] = &[
        (&["ship", "deliver"], "Standard shipping takes 3-5 business days; express shipping takes 1-2 business days."),
        (&["return", "refund"], "You can return unused items within 30 days of delivery for a full refund."),
        (&["hour", "open"], "Our support team is available Monday to Friday, 9am to 6pm."),
        (&["currenc", "pay"], "We accept payments in USD, EUR, GBP and VND."),
        (&["warrant"], "Electronics come with a 12-month manufacturer warranty."),
    ];
    ANSWERS
        .iter()
        .find(|(keys, _)| keys.iter().any(|key| text.contains(key)))
        .map(|(_, answer)| (*answer).to_string())
        .unwrap_or_else(|| {
            "I couldn't find an answer to your question. Please contact support.".to_string()
        })
}
