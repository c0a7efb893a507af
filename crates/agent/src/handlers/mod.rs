//! Role handlers and the registry the orchestrator dispatches through.
//!
//! A handler turns the conversation so far plus the turn context into a reply
//! and an optional context patch. Handlers are registered by role name; the
//! chat graph has one node per registered role.

mod generative;
mod order;
mod payment;
mod product_search;

pub use generative::GenerativeHandler;
pub use order::OrderHandler;
pub use payment::PaymentHandler;
pub use product_search::ProductSearchHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Message, Role, TurnContext};
use concierge_core::payments::{PaymentError, PaymentStateMachine, RepositoryError};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::llm::LlmClient;

pub const CONVERSATION: &str = "conversation";
pub const PAYMENT: &str = "payment";
pub const FAQ: &str = "faq";
pub const ESCALATION: &str = "escalation";
pub const PRODUCT_SEARCH: &str = "product_search";
pub const ORDER: &str = "order";

pub const ROLES: [&str; 6] = [CONVERSATION, PAYMENT, FAQ, ESCALATION, PRODUCT_SEARCH, ORDER];

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("generation service failed: {0}")]
    Generation(String),
    #[error("turn context is missing `{0}`")]
    MissingContext(&'static str),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandlerReply {
    pub text: String,
    /// Entries merged into the session context after the turn.
    pub context: TurnContext,
}

impl HandlerReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), context: TurnContext::new() }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn role(&self) -> &'static str;

    async fn process(
        &self,
        messages: &[Message],
        context: &TurnContext,
    ) -> Result<HandlerReply, HandlerError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Registers a handler under its role, replacing any previous one.
    pub fn register<H>(&mut self, handler: H)
    where
        H: Handler + 'static,
    {
        self.register_shared(Arc::new(handler));
    }

    pub fn register_shared(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.role().to_string(), handler);
    }

    pub fn get(&self, role: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(role).cloned()
    }

    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Registry with all six roles wired to their default implementations.
pub fn standard_registry(
    client: Arc<dyn LlmClient>,
    machine: Arc<PaymentStateMachine>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::default();
    registry.register(GenerativeHandler::conversation(Arc::clone(&client)));
    registry.register(GenerativeHandler::faq(Arc::clone(&client)));
    registry.register(GenerativeHandler::escalation(client));
    registry.register(ProductSearchHandler::new(Arc::clone(machine.catalog())));
    registry.register(OrderHandler::new(Arc::clone(&machine)));
    registry.register(PaymentHandler::new(machine));
    registry
}

pub(crate) fn latest_user_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
        .unwrap_or_default()
}

pub(crate) fn context_str<'a>(context: &'a TurnContext, key: &str) -> Option<&'a str> {
    context.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
}

pub(crate) fn format_money(amount: Decimal, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("USD") {
        format!("${:.2}", amount)
    } else {
        format!("{:.2} {}", amount, currency)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use concierge_core::audit::InMemoryAuditSink;
    use concierge_core::domain::product::{Product, ProductId};
    use concierge_core::payments::{
        InMemoryOrderRepository, InMemoryPaymentRepository, InMemoryProductCatalog, PaymentPolicy,
        PaymentStateMachine,
    };
    use rust_decimal::Decimal;

    pub fn product(id: &str, name: &str, category: &str, cents: i64, stock: u32) -> Product {
        Product {
            id: ProductId(id.to_string()),
            name: name.to_string(),
            description: format!("{name} for everyday use"),
            category: category.to_string(),
            price: Decimal::new(cents, 2),
            stock,
        }
    }

    pub fn catalog() -> Vec<Product> {
        vec![
            product("prod_001", "MacBook Pro 14 laptop", "Electronics", 199_900, 10),
            product("prod_002", "Dell XPS 13 laptop", "Electronics", 129_900, 2),
            product("prod_004", "Sony WH-1000XM5 Headphones", "Electronics", 39_999, 30),
            product("prod_007", "The Pragmatic Programmer", "Books", 4_999, 50),
        ]
    }

    pub fn machine() -> Arc<PaymentStateMachine> {
        Arc::new(PaymentStateMachine::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryPaymentRepository::new()),
            Arc::new(InMemoryProductCatalog::new(catalog())),
            PaymentPolicy::default(),
            Arc::new(InMemoryAuditSink::default()),
        ))
    }
}
