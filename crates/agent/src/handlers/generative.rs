use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Message, TurnContext};
use tracing::debug;

use super::{Handler, HandlerError, HandlerReply, CONVERSATION, ESCALATION, FAQ};
use crate::llm::{LlmClient, Prompt, PromptTask};
use crate::prompts;

/// Handler whose reply comes straight from the generation service.
pub struct GenerativeHandler {
    role: &'static str,
    task: PromptTask,
    client: Arc<dyn LlmClient>,
}

impl GenerativeHandler {
    pub fn conversation(client: Arc<dyn LlmClient>) -> Self {
        Self { role: CONVERSATION, task: PromptTask::Conversation, client }
    }

    pub fn faq(client: Arc<dyn LlmClient>) -> Self {
        Self { role: FAQ, task: PromptTask::Faq, client }
    }

    pub fn escalation(client: Arc<dyn LlmClient>) -> Self {
        Self { role: ESCALATION, task: PromptTask::Escalation, client }
    }
}

#[async_trait]
impl Handler for GenerativeHandler {
    fn role(&self) -> &'static str {
        self.role
    }

    async fn process(
        &self,
        messages: &[Message],
        _context: &TurnContext,
    ) -> Result<HandlerReply, HandlerError> {
        let prompt = Prompt::from_messages(self.task, prompts::system_prompt(self.task), messages);
        let text = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| HandlerError::Generation(error.to_string()))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HandlerError::Generation("empty completion".to_string()));
        }
        debug!(event_name = "agent.handler.generated", role = self.role, chars = text.len());

        let reply = HandlerReply::text(text);
        Ok(match self.task {
            PromptTask::Escalation => reply.with_context("escalated", true),
            _ => reply,
        })
    }
}
