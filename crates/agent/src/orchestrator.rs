//! The chat graph and the turn-level entry point built on it.
//!
//! `classify` runs first, a router maps the intent to exactly one handler node
//! and every handler node ends the run. Handler failures degrade to a fixed
//! reply for that role; checkpoint failures abort the turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::checkpoint::{validate_thread_id, CheckpointStore};
use concierge_core::config::WorkflowConfig;
use concierge_core::domain::conversation::{
    ConversationState, Intent, Message, SessionId, StateUpdate, TurnContext, DEGRADED_REPLY,
};
use concierge_core::errors::{ApplicationError, DomainError};
use concierge_core::memory::SessionMemoryManager;
use concierge_core::workflow::{
    router_fn, Fallback, GraphBuildError, GraphBuilder, Node, NodeError, Resume, Routes, Workflow, END,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::IntentClassifier;
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::handlers::{
    self, Handler, HandlerRegistry, CONVERSATION, ESCALATION, FAQ, ORDER, PAYMENT, PRODUCT_SEARCH,
};

pub const CLASSIFY: &str = "classify";
pub const MAX_MESSAGE_CHARS: usize = 10_000;

const HANDLER_FALLBACKS: [(&str, &str); 6] = [
    (CONVERSATION, DEGRADED_REPLY),
    (PAYMENT, "Payment processing failed. Please try again."),
    (FAQ, "I couldn't find an answer to your question. Please contact support."),
    (ESCALATION, "I'll connect you with our support team. Please hold on."),
    (PRODUCT_SEARCH, "I encountered an error while searching for products. Please try again."),
    (ORDER, "I encountered an error while creating your order. Please try again."),
];

/// Routing is a pure function of the intent; confidence never changes the target.
pub fn route_by_intent(state: &ConversationState) -> String {
    let role = match state.intent {
        Some(Intent::Payment) => PAYMENT,
        Some(Intent::Faq) => FAQ,
        Some(Intent::Escalation) => ESCALATION,
        Some(Intent::ProductSearch) => PRODUCT_SEARCH,
        Some(Intent::Order) => ORDER,
        Some(Intent::General | Intent::Unknown) | None => CONVERSATION,
    };
    role.to_string()
}

struct ClassifyNode {
    classifier: Arc<dyn IntentClassifier>,
    guardrails: GuardrailPolicy,
}

#[async_trait]
impl Node<ConversationState> for ClassifyNode {
    async fn run(&self, state: &ConversationState) -> Result<StateUpdate, NodeError> {
        let classification =
            self.classifier.classify(&state.messages, &state.context).await.map_err(NodeError::failed)?;
        let text = state.last_user_message().map(|message| message.content.as_str()).unwrap_or_default();

        let decision = self.guardrails.evaluate(&classification, text);
        if let GuardrailDecision::Downgrade { reason_code, .. } = &decision {
            warn!(
                event_name = "agent.guardrail.downgraded",
                session_id = %state.session_id,
                reason_code = *reason_code,
                original_confidence = classification.confidence,
                "payment intent without payment signal"
            );
        }
        let classification = decision.apply(classification);
        Ok(StateUpdate::classified(classification.intent, classification.confidence)
            .with_context("intent_reasoning", classification.reasoning))
    }
}

struct HandlerNode {
    handler: Arc<dyn Handler>,
}

#[async_trait]
impl Node<ConversationState> for HandlerNode {
    async fn run(&self, state: &ConversationState) -> Result<StateUpdate, NodeError> {
        let reply =
            self.handler.process(&state.messages, &state.context).await.map_err(NodeError::failed)?;
        Ok(StateUpdate::reply(reply.text).with_context_patch(reply.context))
    }
}

/// Compiles the chat graph. Every role in [`handlers::ROLES`] must be registered.
pub fn build_chat_graph(
    classifier: Arc<dyn IntentClassifier>,
    guardrails: GuardrailPolicy,
    registry: &HandlerRegistry,
    config: &WorkflowConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
) -> Result<Workflow<ConversationState>, GraphBuildError> {
    let mut builder = GraphBuilder::new()
        .register_node(CLASSIFY, ClassifyNode { classifier, guardrails })
        .set_entry(CLASSIFY)
        .with_fallback(
            CLASSIFY,
            Fallback::new(Resume::FollowEdges, |_: &NodeError| {
                StateUpdate::classified(Intent::General, 0.5)
                    .with_context("intent_reasoning", "Classification failed, defaulting to GENERAL")
            }),
        )
        .max_steps(config.max_steps)
        .node_timeout(Duration::from_secs(config.node_timeout_secs));

    let mut routes = Routes::new();
    for (role, fallback_reply) in HANDLER_FALLBACKS {
        let handler = registry
            .get(role)
            .ok_or(GraphBuildError::UnknownNode { context: "handler registry", id: role.to_string() })?;
        builder = builder
            .register_node(role, HandlerNode { handler })
            .add_edge(role, END)
            .with_fallback(
                role,
                Fallback::new(Resume::End, move |_: &NodeError| StateUpdate::reply(fallback_reply)),
            );
        routes = routes.route(role, role);
    }
    builder = builder.add_conditional_edge(
        CLASSIFY,
        router_fn(handlers::ROLES, route_by_intent),
        routes,
    );

    if let Some(store) = checkpoints {
        builder = builder.checkpoints(store);
    }
    builder.compile()
}

#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub message: String,
    pub context: TurnContext,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: String,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
}

pub struct ChatOrchestrator {
    workflow: Workflow<ConversationState>,
    memory: Arc<SessionMemoryManager>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ChatOrchestrator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        registry: &HandlerRegistry,
        memory: Arc<SessionMemoryManager>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &WorkflowConfig,
    ) -> Result<Self, GraphBuildError> {
        let workflow = build_chat_graph(
            classifier,
            GuardrailPolicy::default(),
            registry,
            config,
            Some(Arc::clone(&checkpoints)),
        )?;
        Ok(Self { workflow, memory, checkpoints })
    }

    pub fn memory(&self) -> &Arc<SessionMemoryManager> {
        &self.memory
    }

    /// Runs one turn: resume the session, classify, dispatch, persist.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, ApplicationError> {
        let message = validate_message(&request.message)?;
        let session_id = match request.session_id.as_deref() {
            Some(raw) => parse_session_id(raw)?,
            None => SessionId::generate(),
        };
        let correlation_id = Uuid::new_v4().to_string();

        let mut state = self.resume(&session_id).await?;
        state.context.extend(request.context);
        state.context.insert("session_id".to_string(), Value::from(session_id.as_str()));
        if let Some(summary) = self.memory.get_summary(&session_id).await {
            state.context.insert("conversation_summary".to_string(), Value::from(summary));
        }
        let user_message = Message::user(message);
        state.messages.push(user_message.clone());

        let outcome = self.workflow.run_thread(session_id.as_str(), state).await?;
        let final_state = outcome.state;
        let reply = final_state.final_response.clone().unwrap_or_else(|| DEGRADED_REPLY.to_string());

        self.memory.append_all(&session_id, vec![user_message, Message::assistant(reply.clone())]).await;

        info!(
            event_name = "agent.turn.completed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            intent = final_state.intent.map(|intent| intent.as_str()).unwrap_or("none"),
            confidence = final_state.intent_confidence.unwrap_or_default(),
            path = %outcome.path.join(">"),
            degraded = outcome.degraded.len(),
            "turn completed"
        );
        Ok(TurnReply {
            session_id,
            reply,
            intent: final_state.intent,
            confidence: final_state.intent_confidence,
        })
    }

    /// Latest checkpointed state with per-turn fields reset and history taken
    /// from memory. An empty memory is rehydrated from the checkpoint.
    async fn resume(&self, session_id: &SessionId) -> Result<ConversationState, ApplicationError> {
        let mut state = self
            .workflow
            .latest_state(session_id.as_str())
            .await?
            .unwrap_or_else(|| ConversationState::new(session_id.clone()));
        state.session_id = session_id.clone();
        state.intent = None;
        state.intent_confidence = None;
        state.final_response = None;

        let remembered = self.memory.get_messages(session_id).await;
        if remembered.is_empty() && !state.messages.is_empty() {
            self.memory.append_all(session_id, state.messages.clone()).await;
            state.messages = self.memory.get_messages(session_id).await;
        } else {
            state.messages = remembered;
        }
        Ok(state)
    }

    /// Session history from memory, or from the latest checkpoint after a restart.
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, ApplicationError> {
        let session_id = parse_session_id(session_id)?;
        let remembered = self.memory.get_messages(&session_id).await;
        if !remembered.is_empty() {
            return Ok(remembered);
        }
        let Some(state) = self.workflow.latest_state(session_id.as_str()).await? else {
            return Ok(Vec::new());
        };
        let capacity = self.memory.settings().capacity;
        let skip = state.messages.len().saturating_sub(capacity);
        Ok(state.messages.into_iter().skip(skip).collect())
    }

    /// Drops the session's memory and appends an empty checkpoint so a restart
    /// does not bring the history back. Returns whether anything was cleared.
    pub async fn clear_history(&self, session_id: &str) -> Result<bool, ApplicationError> {
        let session_id = parse_session_id(session_id)?;
        let cleared_memory = self.memory.clear(&session_id).await;
        let had_checkpoint = self.checkpoints.get_latest(session_id.as_str()).await?.is_some();
        if had_checkpoint {
            let empty = serde_json::to_value(ConversationState::new(session_id.clone()))
                .map_err(|error| ApplicationError::Workflow(error.to_string()))?;
            self.checkpoints.put(session_id.as_str(), empty).await?;
        }
        info!(
            event_name = "agent.history.cleared",
            session_id = %session_id,
            cleared_memory,
            had_checkpoint,
        );
        Ok(cleared_memory || had_checkpoint)
    }
}

fn validate_message(raw: &str) -> Result<&str, ApplicationError> {
    let message = raw.trim();
    if message.is_empty() {
        return Err(DomainError::Validation("Message content cannot be empty".to_string()).into());
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DomainError::Validation("Message content exceeds maximum length".to_string()).into());
    }
    Ok(message)
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApplicationError> {
    let raw = raw.trim();
    validate_thread_id(raw)
        .map_err(|_| DomainError::Validation(format!("Invalid session id `{raw}`")))?;
    Ok(SessionId(raw.to_string()))
}
