use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Message, TurnContext};
use concierge_core::domain::order::{Order, OrderId, OrderStatus};
use concierge_core::domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
use concierge_core::flows::FlowTransitionError;
use concierge_core::payments::{PaymentError, PaymentRequestOutcome, PaymentStateMachine};
use serde_json::Value;
use tracing::info;

use super::order::PENDING_ORDER_KEY;
use super::{context_str, format_money, latest_user_text, Handler, HandlerError, HandlerReply, PAYMENT};
use crate::extract::{extract_amount, extract_currency, extract_order_id, extract_transaction_id};

pub const TRANSACTION_KEY: &str = "payment_transaction_id";

const MISSING_AMOUNT: &str = "Please specify the payment amount. Example: 'I want to pay $50'";

pub struct PaymentHandler {
    machine: Arc<PaymentStateMachine>,
}

impl PaymentHandler {
    pub fn new(machine: Arc<PaymentStateMachine>) -> Self {
        Self { machine }
    }

    async fn confirm(&self, transaction_id: &TransactionId) -> Result<HandlerReply, PaymentError> {
        let payment = self.machine.confirm_payment(transaction_id).await?;
        let mut text = format!(
            "Payment {} confirmed. Amount: {}.",
            payment.transaction_id,
            format_money(payment.amount, &payment.currency)
        );
        let mut reply = HandlerReply::default();
        if let Some(order_id) = &payment.order_id {
            text.push_str(&format!(" Order {order_id} is now paid."));
            reply = reply.with_context(PENDING_ORDER_KEY, Value::Null);
        }
        reply.text = text;
        Ok(reply)
    }

    async fn status(&self, transaction_id: &TransactionId) -> Result<HandlerReply, PaymentError> {
        let payment = self.machine.get_payment(transaction_id).await?;
        let mut text = format!(
            "Payment {} for {} is {}.",
            payment.transaction_id,
            format_money(payment.amount, &payment.currency),
            payment.status.as_str()
        );
        if payment.status == PaymentStatus::AwaitingPayment {
            text.push_str(&format!(" Once it completes, say 'confirm {}'.", payment.transaction_id));
        }
        Ok(HandlerReply::text(text))
    }

    /// Orders are priced from the catalog, so they are always charged in the
    /// policy's default currency regardless of what the message mentions.
    async fn pay_order(&self, order_id: &OrderId) -> Result<HandlerReply, PaymentError> {
        let order = self.machine.get_order(order_id).await?;
        match order.status {
            OrderStatus::Paid => {
                return Ok(HandlerReply::text(format!("Order {order_id} has already been paid.")))
            }
            OrderStatus::Cancelled => {
                return Ok(HandlerReply::text(format!(
                    "Order {order_id} was cancelled and can no longer be paid."
                )))
            }
            OrderStatus::Pending | OrderStatus::AwaitingPayment => {}
        }

        let currency = self.machine.policy().default_currency.clone();
        let outcome = self.machine.create_payment_request(order_id, order.total, &currency).await?;
        let text = match &outcome {
            PaymentRequestOutcome::Created(request) => render_created(&order, request),
            PaymentRequestOutcome::Duplicate(request) => format!(
                "Order {order_id} is already awaiting payment.\n\nTransaction ID: {}\nAmount: {}\n\n\
                 Please complete the pending payment or contact support if you need assistance.",
                request.transaction_id,
                format_money(request.amount, &request.currency)
            ),
        };
        let transaction_id = outcome.request().transaction_id.0.clone();
        Ok(HandlerReply::text(text)
            .with_context(TRANSACTION_KEY, transaction_id)
            .with_context(PENDING_ORDER_KEY, order_id.0.clone()))
    }

    async fn pay_amount(&self, text: &str) -> Result<HandlerReply, PaymentError> {
        let Some(amount) = extract_amount(text) else {
            return Ok(HandlerReply::text(MISSING_AMOUNT));
        };
        let currency = extract_currency(text).unwrap_or_else(|| self.machine.policy().default_currency.clone());
        let request = self
            .machine
            .create_standalone_payment(amount, &currency, Some("Payment via chat".to_string()))
            .await?;
        let text = format!(
            "Payment request created.\n\nTransaction ID: {}\nAmount: {}\nStatus: {}\n\n\
             Once payment completes, say 'confirm {}'.",
            request.transaction_id,
            format_money(request.amount, &request.currency),
            request.status.as_str(),
            request.transaction_id
        );
        Ok(HandlerReply::text(text).with_context(TRANSACTION_KEY, request.transaction_id.0.clone()))
    }
}

fn render_created(order: &Order, request: &PaymentRequest) -> String {
    let mut text = format!(
        "Payment request created for order {}.\n\nTransaction ID: {}\nAmount: {}\nStatus: {}\n\nItems:\n",
        order.id,
        request.transaction_id,
        format_money(request.amount, &request.currency),
        request.status.as_str()
    );
    for item in &order.items {
        text.push_str(&format!(
            "- {} x{} = {}\n",
            item.product_name,
            item.quantity,
            format_money(item.subtotal, &request.currency)
        ));
    }
    text.push_str(&format!("\nOnce payment completes, say 'confirm {}'.", request.transaction_id));
    text
}

fn rejected_transition(error: &FlowTransitionError) -> String {
    format!(
        "That request cannot be completed because the {} is already {}.",
        match error {
            FlowTransitionError::InvalidTransition { flow, .. } => flow.as_str(),
        },
        error.state()
    )
}

#[async_trait]
impl Handler for PaymentHandler {
    fn role(&self) -> &'static str {
        PAYMENT
    }

    async fn process(
        &self,
        messages: &[Message],
        context: &TurnContext,
    ) -> Result<HandlerReply, HandlerError> {
        let text = latest_user_text(messages);
        let lowered = text.to_lowercase();

        let result = if let Some(transaction_id) = extract_transaction_id(text) {
            if lowered.contains("confirm") {
                self.confirm(&transaction_id).await
            } else {
                self.status(&transaction_id).await
            }
        } else if let Some(order_id) = extract_order_id(text)
            .or_else(|| context_str(context, PENDING_ORDER_KEY).map(|id| OrderId(id.to_string())))
        {
            self.pay_order(&order_id).await
        } else {
            self.pay_amount(text).await
        };

        match result {
            Ok(reply) => {
                info!(
                    event_name = "agent.payment.handled",
                    transaction_id = reply.context.get(TRANSACTION_KEY).and_then(serde_json::Value::as_str).unwrap_or(""),
                );
                Ok(reply)
            }
            Err(PaymentError::Validation(message)) => Ok(HandlerReply::text(message)),
            Err(PaymentError::InvalidTransition(error)) => Ok(HandlerReply::text(rejected_transition(&error))),
            Err(PaymentError::NotFound { entity, id }) => {
                Ok(HandlerReply::text(format!("No {entity} found with ID {id}. Please check the ID.")))
            }
            Err(error) => Err(error.into()),
        }
    }
}
