use async_trait::async_trait;
use thiserror::Error;

use crate::domain::conversation::{Message, Role};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("summarization failed: {0}")]
pub struct SummaryError(pub String);

/// Folds messages trimmed from the history window into a running summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, previous: Option<&str>, messages: &[Message]) -> Result<String, SummaryError>;
}

/// Deterministic summarizer that keeps counts plus a short excerpt of the latest user request.
#[derive(Clone, Debug)]
pub struct DigestSummarizer {
    pub excerpt_chars: usize,
}

impl Default for DigestSummarizer {
    fn default() -> Self {
        Self { excerpt_chars: 80 }
    }
}

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, previous: Option<&str>, messages: &[Message]) -> Result<String, SummaryError> {
        let (prior_user, prior_assistant) = previous.map(parse_counts).unwrap_or((0, 0));
        let user = prior_user + messages.iter().filter(|m| m.role == Role::User).count();
        let assistant = prior_assistant + messages.iter().filter(|m| m.role == Role::Assistant).count();

        let mut summary = format!(
            "Conversation has {} messages ({user} from user, {assistant} from assistant)",
            user + assistant
        );
        if let Some(last) = messages.iter().rev().find(|m| m.role == Role::User) {
            let excerpt: String = last.content.chars().take(self.excerpt_chars).collect();
            summary.push_str(&format!(". Latest request: \"{excerpt}\""));
        }
        Ok(summary)
    }
}

fn parse_counts(summary: &str) -> (usize, usize) {
    let Some(open) = summary.find('(') else {
        return (0, 0);
    };
    let mut numbers = summary[open..]
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<usize>().ok());
    (numbers.next().unwrap_or(0), numbers.next().unwrap_or(0))
}
