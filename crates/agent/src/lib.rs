//! Conversation agent: intent classification, role handlers and the chat
//! orchestrator that ties them to the workflow engine.
//!
//! # Turn flow
//!
//! 1. **Classification** (`classifier`): keyword fast path, then the generation
//!    service. Failures fall back to a general intent.
//! 2. **Guardrails** (`guardrails`): deterministic corrections applied to the
//!    classification before routing.
//! 3. **Dispatch** (`orchestrator`): the intent selects exactly one handler.
//! 4. **Handlers** (`handlers`): product search, ordering and payments go
//!    through the payment state machine; the remaining roles are generative.
//!
//! Prices, stock and payment status are never decided by the generation
//! service. It only phrases replies and suggests intents.

pub mod classifier;
pub mod extract;
pub mod guardrails;
pub mod handlers;
pub mod llm;
pub mod orchestrator;
pub mod prompts;

pub use classifier::{Classification, ClassificationError, IntentClassifier, LlmClassifier};
pub use handlers::{standard_registry, Handler, HandlerError, HandlerRegistry, HandlerReply};
pub use llm::{LlmClient, OfflineLlmClient, RetryingLlmClient};
pub use orchestrator::{ChatOrchestrator, TurnReply, TurnRequest};
