use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Message, SessionId, TurnContext};
use concierge_core::domain::order::Order;
use concierge_core::domain::product::ProductId;
use concierge_core::payments::{OrderLine, PaymentError, PaymentStateMachine};
use serde_json::Value;
use tracing::info;

use super::product_search::LAST_VIEWED_KEY;
use super::{context_str, format_money, latest_user_text, Handler, HandlerError, HandlerReply, ORDER};
use crate::extract::{extract_product_ids, extract_quantity, extract_selection};

pub const PENDING_ORDER_KEY: &str = "pending_order_id";

const UNRESOLVED: &str =
    "Please specify which product you want. You can say 'I want the first one' or provide a product ID.";

pub struct OrderHandler {
    machine: Arc<PaymentStateMachine>,
}

impl OrderHandler {
    pub fn new(machine: Arc<PaymentStateMachine>) -> Self {
        Self { machine }
    }
}

/// Explicit `prod_*` ids win; otherwise a selection against the last listing.
fn resolve_products(text: &str, context: &TurnContext) -> Vec<ProductId> {
    let explicit = extract_product_ids(text);
    if !explicit.is_empty() {
        return explicit;
    }
    let Some(selection) = extract_selection(text) else {
        return Vec::new();
    };
    context
        .get(LAST_VIEWED_KEY)
        .and_then(Value::as_array)
        .and_then(|viewed| viewed.get(selection.index()))
        .and_then(|entry| entry.get("id"))
        .and_then(Value::as_str)
        .map(|id| vec![ProductId(id.to_string())])
        .unwrap_or_default()
}

fn render_summary(order: &Order) -> String {
    let mut summary = format!(
        "Order created successfully!\n\nOrder ID: {}\nStatus: {}\n\nItems:\n",
        order.id,
        order.status.as_str()
    );
    for item in &order.items {
        summary.push_str(&format!(
            "- {} x{} = {}\n",
            item.product_name,
            item.quantity,
            format_money(item.subtotal, "USD")
        ));
    }
    summary.push_str(&format!(
        "\nTotal: {}\n\nReady to proceed with payment? Say 'Pay now' or 'I want to pay'",
        format_money(order.total, "USD")
    ));
    summary
}

#[async_trait]
impl Handler for OrderHandler {
    fn role(&self) -> &'static str {
        ORDER
    }

    async fn process(
        &self,
        messages: &[Message],
        context: &TurnContext,
    ) -> Result<HandlerReply, HandlerError> {
        let session_id = context_str(context, "session_id")
            .map(|id| SessionId(id.to_string()))
            .ok_or(HandlerError::MissingContext("session_id"))?;
        let text = latest_user_text(messages);

        let products = resolve_products(text, context);
        if products.is_empty() {
            return Ok(HandlerReply::text(UNRESOLVED));
        }
        let quantity = extract_quantity(text).unwrap_or(1);
        let lines: Vec<OrderLine> = products
            .into_iter()
            .map(|product_id| OrderLine { product_id, quantity })
            .collect();

        let order = match self.machine.create_order(&session_id, &lines).await {
            Ok(order) => order,
            Err(PaymentError::Validation(message)) => return Ok(HandlerReply::text(message)),
            Err(PaymentError::NotFound { id, .. }) => {
                return Ok(HandlerReply::text(format!(
                    "Product {id} not found. Please search for products first."
                )))
            }
            Err(error) => return Err(error.into()),
        };

        info!(
            event_name = "agent.order.created",
            session_id = %session_id,
            order_id = %order.id,
            total = %order.total,
        );
        Ok(HandlerReply::text(render_summary(&order))
            .with_context(PENDING_ORDER_KEY, order.id.0.clone())
            .with_context("order_total", order.total.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::conversation::{Message, TurnContext};
    use concierge_core::domain::order::{OrderId, OrderStatus};
    use serde_json::json;

    use super::{OrderHandler, PENDING_ORDER_KEY};
    use crate::handlers::{test_support, Handler, HandlerError};

    fn context_with_listing() -> TurnContext {
        let mut context = TurnContext::new();
        context.insert("session_id".to_string(), json!("session_order_test"));
        context.insert(
            "last_viewed_products".to_string(),
            json!([{ "id": "prod_001" }, { "id": "prod_002" }]),
        );
        context
    }

    #[tokio::test]
    async fn selection_resolves_against_the_last_listing() {
        let machine = test_support::machine();
        let handler = OrderHandler::new(machine.clone());

        let reply = handler
            .process(&[Message::user("I want 2 of the second one")], &context_with_listing())
            .await
            .expect("reply");

        assert!(reply.text.contains("Dell XPS 13 laptop x2 = $2598.00"));
        assert!(reply.text.contains("Say 'Pay now'"));
        let order_id = reply.context.get(PENDING_ORDER_KEY).and_then(|value| value.as_str()).expect("order id");
        let order = machine.get_order(&OrderId(order_id.to_string())).await.expect("stored");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.session_id.as_str(), "session_order_test");
    }

    #[tokio::test]
    async fn explicit_product_id_and_stock_errors() {
        let handler = OrderHandler::new(test_support::machine());

        let reply = handler
            .process(&[Message::user("order product prod_007")], &context_with_listing())
            .await
            .expect("reply");
        assert!(reply.text.contains("The Pragmatic Programmer x1"));

        let reply = handler
            .process(&[Message::user("I want 5 of prod_002")], &context_with_listing())
            .await
            .expect("reply");
        assert_eq!(reply.text, "Insufficient stock for Dell XPS 13 laptop. Available: 2");
        assert!(reply.context.is_empty());

        let reply = handler
            .process(&[Message::user("order product prod_999")], &context_with_listing())
            .await
            .expect("reply");
        assert_eq!(reply.text, "Product prod_999 not found. Please search for products first.");
    }

    #[tokio::test]
    async fn unresolved_selection_asks_for_a_product() {
        let handler = OrderHandler::new(test_support::machine());
        let mut context = context_with_listing();
        context.remove("last_viewed_products");

        let reply = handler
            .process(&[Message::user("I want the first one")], &context)
            .await
            .expect("reply");
        assert!(reply.text.starts_with("Please specify which product you want."));

        let error = handler
            .process(&[Message::user("I want prod_001")], &TurnContext::new())
            .await
            .expect_err("no session");
        assert!(matches!(error, HandlerError::MissingContext("session_id")));
    }
}
