use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::hex_suffix;
use crate::workflow::{GraphState, NodeError};

/// Free-form per-session context carried between turns (pending order, last products viewed, ...).
pub type TurnContext = BTreeMap<String, Value>;

pub const DEGRADED_REPLY: &str = "I apologize, but I encountered an error. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub const PREFIX: &'static str = "session_";

    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, hex_suffix(16)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    General,
    Payment,
    Faq,
    Escalation,
    ProductSearch,
    Order,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Self::General,
        Self::Payment,
        Self::Faq,
        Self::Escalation,
        Self::ProductSearch,
        Self::Order,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Payment => "payment",
            Self::Faq => "faq",
            Self::Escalation => "escalation",
            Self::ProductSearch => "product_search",
            Self::Order => "order",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|intent| intent.as_str() == normalized)
    }
}

/// Mutable state threaded through one turn of the conversation workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub messages: Vec<Message>,
    pub intent: Option<Intent>,
    pub intent_confidence: Option<f64>,
    pub context: TurnContext,
    pub final_response: Option<String>,
}

impl ConversationState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            intent: None,
            intent_confidence: None,
            context: TurnContext::new(),
            final_response: None,
        }
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.role == Role::User)
    }
}

/// Sparse update returned by a workflow node.
///
/// Merge rules: scalar fields overwrite when present, `messages` are appended,
/// `context` entries are merged key by key, and `final_response` is set at most
/// once per turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub intent: Option<Intent>,
    pub intent_confidence: Option<f64>,
    pub context: TurnContext,
    pub final_response: Option<String>,
}

impl StateUpdate {
    pub fn classified(intent: Intent, confidence: f64) -> Self {
        Self {
            intent: Some(intent),
            intent_confidence: Some(confidence.clamp(0.0, 1.0)),
            ..Self::default()
        }
    }

    /// Final reply plus the matching assistant message.
    pub fn reply(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            messages: vec![Message::assistant(text.clone())],
            final_response: Some(text),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_context_patch(mut self, patch: TurnContext) -> Self {
        self.context.extend(patch);
        self
    }
}

impl GraphState for ConversationState {
    type Update = StateUpdate;

    fn merge(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(confidence) = update.intent_confidence {
            self.intent_confidence = Some(confidence);
        }
        self.context.extend(update.context);
        if let Some(response) = update.final_response {
            if self.final_response.is_some() {
                warn!(
                    event_name = "workflow.state.final_response_ignored",
                    session_id = %self.session_id,
                    "final response already set for this turn; ignoring later value"
                );
            } else {
                self.final_response = Some(response);
            }
        }
    }

    fn degraded(_node: &str, _error: &NodeError) -> StateUpdate {
        StateUpdate::reply(DEGRADED_REPLY)
    }
}
