//! Intent classification: a keyword fast path for unambiguous phrasings, then
//! the generation service, with a heuristic used by the offline client.

use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Intent, Message, Role, TurnContext};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{LlmClient, Prompt, PromptTask};
use crate::prompts;

pub const FAST_PATH_CONFIDENCE: f64 = 0.95;

const SEARCH_PHRASES: &[&str] =
    &["show me", "search for", "find me", "what products", "do you have", "i want to buy"];
const SEARCH_NOUNS: &[&str] =
    &["product", "laptop", "phone", "iphone", "ipad", "book", "shoes", "headphone"];
const ORDER_PHRASES: &[&str] =
    &["i want the", "i'll take", "i want that", "i want this", "order the", "buy the"];
const SELECTION_WORDS: &[&str] =
    &["first", "second", "third", "one", "that", "this", "#1", "#2", "#3"];
const PAYMENT_PHRASES: &[&str] =
    &["pay now", "i want to pay", "process payment", "make payment", "charge me"];

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub reasoning: String,
}

impl Classification {
    pub fn new(intent: Intent, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self { intent, confidence: confidence.clamp(0.0, 1.0), reasoning: reasoning.into() }
    }

    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self::new(Intent::General, 0.5, reasoning)
    }
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("no user message to classify")]
    EmptyConversation,
    #[error("classification service failed: {0}")]
    Service(String),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        messages: &[Message],
        context: &TurnContext,
    ) -> Result<Classification, ClassificationError>;
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// Deterministic matches that skip the generation service entirely.
pub fn keyword_fast_path(text: &str) -> Option<Classification> {
    let lowered = text.to_lowercase();

    if contains_any(&lowered, SEARCH_PHRASES) && contains_any(&lowered, SEARCH_NOUNS) {
        return Some(Classification::new(
            Intent::ProductSearch,
            FAST_PATH_CONFIDENCE,
            "Keyword match: search phrase with a product noun",
        ));
    }
    if contains_any(&lowered, ORDER_PHRASES) && contains_any(&lowered, SELECTION_WORDS) {
        return Some(Classification::new(
            Intent::Order,
            FAST_PATH_CONFIDENCE,
            "Keyword match: order with selection reference",
        ));
    }
    if lowered.contains("i want product") || lowered.contains("order product") {
        return Some(Classification::new(
            Intent::Order,
            FAST_PATH_CONFIDENCE,
            "Keyword match: order request",
        ));
    }
    if contains_any(&lowered, PAYMENT_PHRASES) {
        return Some(Classification::new(
            Intent::Payment,
            FAST_PATH_CONFIDENCE,
            "Keyword match: payment request",
        ));
    }
    None
}

/// Best-effort keyword classification for text the fast path did not claim.
pub fn heuristic_classification(text: &str) -> Classification {
    if let Some(classification) = keyword_fast_path(text) {
        return classification;
    }
    let lowered = text.to_lowercase();
    let words: Vec<&str> =
        lowered.split(|ch: char| !ch.is_alphanumeric()).filter(|word| !word.is_empty()).collect();
    let has_word = |candidates: &[&str]| words.iter().any(|word| candidates.contains(word));

    if contains_any(&lowered, &["manager", "human", "urgent", "complaint", "speak to"]) {
        Classification::new(Intent::Escalation, 0.8, "Mentions a need for human support")
    } else if contains_any(&lowered, &["hours", "shipping", "return", "refund", "policy", "warranty"]) {
        Classification::new(Intent::Faq, 0.7, "Question about store policies")
    } else if has_word(&["pay", "payment", "charge", "transaction"]) {
        Classification::new(Intent::Payment, 0.75, "Mentions a payment")
    } else if has_word(&["order", "buy", "purchase"]) && lowered.contains("prod_") {
        Classification::new(Intent::Order, 0.75, "Names a product to buy")
    } else if contains_any(&lowered, SEARCH_NOUNS) || has_word(&["products", "catalog", "browse"]) {
        Classification::new(Intent::ProductSearch, 0.7, "Mentions products")
    } else if has_word(&["hello", "hi", "hey", "thanks", "thank"]) {
        Classification::new(Intent::General, 0.6, "Greeting or small talk")
    } else {
        Classification::fallback("No strong signal, defaulting to general")
    }
}

#[derive(Deserialize)]
struct RawClassification {
    intent: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Strips a surrounding markdown code fence, with or without a `json` tag.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest));
    body.unwrap_or(trimmed).trim()
}

/// Parses the service's JSON verdict; anything malformed becomes the general fallback.
pub fn parse_classification(raw: &str) -> Classification {
    let parsed = serde_json::from_str::<RawClassification>(strip_code_fence(raw))
        .ok()
        .and_then(|raw| {
            let intent = Intent::parse(&raw.intent)?;
            raw.confidence.is_finite().then(|| Classification::new(intent, raw.confidence, raw.reasoning))
        });
    match parsed {
        Some(classification) => classification,
        None => {
            warn!(event_name = "agent.classifier.unparseable", raw = %raw, "falling back to general intent");
            Classification::fallback("Failed to parse classification result")
        }
    }
}

pub struct LlmClassifier {
    client: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(
        &self,
        messages: &[Message],
        _context: &TurnContext,
    ) -> Result<Classification, ClassificationError> {
        let latest = messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .ok_or(ClassificationError::EmptyConversation)?;

        if let Some(classification) = keyword_fast_path(&latest.content) {
            info!(
                event_name = "agent.classifier.fast_path",
                intent = classification.intent.as_str(),
                "keyword match"
            );
            return Ok(classification);
        }

        let prompt = Prompt::from_messages(PromptTask::Classification, prompts::CLASSIFICATION, messages);
        let raw = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| ClassificationError::Service(error.to_string()))?;
        let classification = parse_classification(&raw);
        info!(
            event_name = "agent.classifier.classified",
            intent = classification.intent.as_str(),
            confidence = classification.confidence,
            "intent classified"
        );
        Ok(classification)
    }
}
