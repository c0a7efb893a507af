use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::config::PaymentConfig;
use crate::domain::conversation::SessionId;
use crate::domain::order::{Order, OrderId, OrderItem, OrderStatus};
use crate::domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
use crate::domain::product::ProductId;
use crate::errors::{ApplicationError, DomainError};
use crate::flows::{
    FlowAction, FlowEngine, FlowEvent, FlowTransitionError, FlowType, OrderFlow, PaymentFlow,
};
use crate::payments::repository::{
    OrderRepository, OrderStatusChange, PaymentRepository, ProductCatalog, RepositoryError,
};

/// Attempts at a compare-and-set loop before reporting contention.
pub const MAX_CAS_ATTEMPTS: usize = 5;

const ACTOR: &str = "payment-state-machine";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    InvalidTransition(#[from] FlowTransitionError),
    #[error("concurrent updates to {entity} `{id}` did not settle")]
    Contention { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
}

impl From<PaymentError> for ApplicationError {
    fn from(value: PaymentError) -> Self {
        match value {
            PaymentError::Validation(message) => Self::Domain(DomainError::Validation(message)),
            PaymentError::NotFound { entity, id } => Self::NotFound { entity, id },
            PaymentError::InvalidTransition(error) => Self::Domain(DomainError::FlowTransition(error)),
            error @ (PaymentError::Contention { .. } | PaymentError::Persistence(_)) => {
                Self::Persistence(error.to_string())
            }
        }
    }
}

/// Result of asking for a payment request on an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentRequestOutcome {
    Created(PaymentRequest),
    /// The order already had a live request; nothing new was written.
    Duplicate(PaymentRequest),
}

impl PaymentRequestOutcome {
    pub fn request(&self) -> &PaymentRequest {
        match self {
            Self::Created(request) | Self::Duplicate(request) => request,
        }
    }

    pub fn into_request(self) -> PaymentRequest {
        match self {
            Self::Created(request) | Self::Duplicate(request) => request,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentPolicy {
    pub supported_currencies: Vec<String>,
    pub default_currency: String,
    pub max_amount: Decimal,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            supported_currencies: ["USD", "EUR", "GBP", "VND"].into_iter().map(str::to_string).collect(),
            default_currency: "USD".to_string(),
            max_amount: Decimal::from(1_000_000),
        }
    }
}

impl From<&PaymentConfig> for PaymentPolicy {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            supported_currencies: config.supported_currencies.clone(),
            default_currency: config.default_currency.clone(),
            max_amount: config.max_amount,
        }
    }
}

impl PaymentPolicy {
    /// Checks amount and currency; returns the normalized currency code.
    pub fn validate(&self, amount: Decimal, currency: &str) -> Result<String, PaymentError> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation("Amount must be greater than 0".to_string()));
        }
        if amount > self.max_amount {
            return Err(PaymentError::Validation("Payment amount exceeds maximum limit".to_string()));
        }
        let code = currency.trim().to_ascii_uppercase();
        if !self.supported_currencies.contains(&code) {
            return Err(PaymentError::Validation(format!(
                "Invalid currency. Supported: {}",
                self.supported_currencies.join(", ")
            )));
        }
        Ok(code)
    }
}

/// Owns every order and payment status change.
///
/// Persistence goes through compare-and-set updates, so of two racing
/// operations on the same record exactly one applies and the other re-reads
/// and either converges (duplicate request, repeated confirmation) or fails
/// with an invalid transition.
pub struct PaymentStateMachine {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn ProductCatalog>,
    policy: PaymentPolicy,
    order_flow: FlowEngine<OrderFlow>,
    payment_flow: FlowEngine<PaymentFlow>,
    audit: Arc<dyn AuditSink>,
}

impl PaymentStateMachine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        catalog: Arc<dyn ProductCatalog>,
        policy: PaymentPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            orders,
            payments,
            catalog,
            policy,
            order_flow: FlowEngine::new(OrderFlow),
            payment_flow: FlowEngine::new(PaymentFlow),
            audit,
        }
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    pub fn catalog(&self) -> &Arc<dyn ProductCatalog> {
        &self.catalog
    }

    pub async fn create_order(
        &self,
        session_id: &SessionId,
        lines: &[OrderLine],
    ) -> Result<Order, PaymentError> {
        if lines.is_empty() {
            return Err(PaymentError::Validation("Order must contain at least one item".to_string()));
        }
        if lines.iter().any(|line| line.quantity == 0) {
            return Err(PaymentError::Validation("Quantity must be at least 1".to_string()));
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self.catalog.find_by_id(&line.product_id).await?.ok_or_else(|| {
                PaymentError::NotFound { entity: "product", id: line.product_id.0.clone() }
            })?;
            if !product.in_stock(line.quantity) {
                return Err(insufficient_stock(&product.name, product.stock));
            }
            items.push(OrderItem::for_product(&product, line.quantity));
        }

        let mut reserved: Vec<&OrderItem> = Vec::with_capacity(items.len());
        for item in &items {
            if !self.catalog.adjust_stock(&item.product_id, -i64::from(item.quantity)).await? {
                self.release_stock(reserved.iter().copied()).await;
                return Err(insufficient_stock(&item.product_name, 0));
            }
            reserved.push(item);
        }

        let order = Order::new(session_id.clone(), items.clone());
        if let Err(error) = self.orders.create(&order).await {
            self.release_stock(items.iter()).await;
            return Err(error.into());
        }

        let audit = self.audit_context(Some(&order.id), Some(session_id));
        self.audit.emit(
            AuditEvent::from_context(&audit, "order.created", AuditCategory::Order, AuditOutcome::Success)
                .with_metadata("total", order.total.to_string())
                .with_metadata("items", order.items.len().to_string()),
        );
        info!(
            event_name = "order.created",
            correlation_id = %audit.correlation_id,
            order_id = %order.id,
            session_id = %session_id,
            total = %order.total,
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, PaymentError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound { entity: "order", id: order_id.0.clone() })
    }

    pub async fn get_payment(&self, transaction_id: &TransactionId) -> Result<PaymentRequest, PaymentError> {
        self.payments.find_by_id(transaction_id).await?.ok_or_else(|| PaymentError::NotFound {
            entity: "payment request",
            id: transaction_id.0.clone(),
        })
    }

    pub async fn list_session_orders(&self, session_id: &SessionId) -> Result<Vec<Order>, PaymentError> {
        Ok(self.orders.list_for_session(session_id).await?)
    }

    /// Issues a payment request for an order, or returns the order's existing
    /// live request unchanged.
    pub async fn create_payment_request(
        &self,
        order_id: &OrderId,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentRequestOutcome, PaymentError> {
        let currency = self.policy.validate(amount, currency)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            let audit = self.audit_context(Some(order_id), Some(&order.session_id));

            if let Some(existing) = self.payments.find_live_for_order(order_id).await? {
                info!(
                    event_name = "payment.request.duplicate",
                    correlation_id = %audit.correlation_id,
                    order_id = %order_id,
                    transaction_id = %existing.transaction_id,
                    "order already has a live payment request"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit,
                        "payment.request_duplicate",
                        AuditCategory::Payment,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("transaction_id", existing.transaction_id.0.clone()),
                );
                return Ok(PaymentRequestOutcome::Duplicate(existing));
            }

            let order_step = self.order_flow.apply_with_audit(
                &order.status,
                &FlowEvent::PaymentRequested,
                self.audit.as_ref(),
                &audit,
            )?;

            let mut request = PaymentRequest::new(
                Some(order_id.clone()),
                amount,
                currency.clone(),
                Some(format!("Payment for order {order_id}")),
            );
            request.status = self.payment_flow.apply(&request.status, &FlowEvent::PaymentRequested)?.to;

            if !self.payments.insert_live(&request).await? {
                // a concurrent caller inserted first; the next pass returns it as a duplicate
                continue;
            }

            let change = OrderStatusChange {
                expected: order.status.clone(),
                expected_version: order.state_version,
                next: order_step.to,
                payment_id: Some(request.transaction_id.clone()),
                at: Utc::now(),
            };
            if self.orders.update_status(order_id, change).await? {
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit,
                        "payment.request_created",
                        AuditCategory::Payment,
                        AuditOutcome::Success,
                    )
                    .with_metadata("transaction_id", request.transaction_id.0.clone())
                    .with_metadata("amount", request.amount.to_string())
                    .with_metadata("currency", request.currency.clone()),
                );
                info!(
                    event_name = "payment.request.created",
                    correlation_id = %audit.correlation_id,
                    order_id = %order_id,
                    transaction_id = %request.transaction_id,
                    amount = %request.amount,
                    currency = %request.currency,
                    "payment request created"
                );
                return Ok(PaymentRequestOutcome::Created(request));
            }

            warn!(
                event_name = "payment.request.cas_conflict",
                correlation_id = %audit.correlation_id,
                order_id = %order_id,
                transaction_id = %request.transaction_id,
                "order changed while linking payment request; voiding it"
            );
            let voided = self
                .payments
                .update_status(
                    &request.transaction_id,
                    &request.status,
                    &PaymentStatus::Cancelled,
                    Utc::now(),
                )
                .await?;
            if !voided {
                // confirmed before it was linked; the confirmation carried the order forward
                let current = self.get_payment(&request.transaction_id).await?;
                info!(
                    event_name = "payment.request.confirmed_before_link",
                    correlation_id = %audit.correlation_id,
                    order_id = %order_id,
                    transaction_id = %current.transaction_id,
                    status = current.status.as_str(),
                    "payment request settled by a concurrent confirmation"
                );
                return Ok(PaymentRequestOutcome::Created(current));
            }
        }

        Err(PaymentError::Contention { entity: "order", id: order_id.0.clone() })
    }

    /// Payment request without an order.
    pub async fn create_standalone_payment(
        &self,
        amount: Decimal,
        currency: &str,
        description: Option<String>,
    ) -> Result<PaymentRequest, PaymentError> {
        let currency = self.policy.validate(amount, currency)?;
        let mut request = PaymentRequest::new(None, amount, currency, description);
        request.status = self.payment_flow.apply(&request.status, &FlowEvent::PaymentRequested)?.to;

        if !self.payments.insert_live(&request).await? {
            return Err(PaymentError::Contention {
                entity: "payment request",
                id: request.transaction_id.0.clone(),
            });
        }

        let audit = self.audit_context(None, None);
        self.audit.emit(
            AuditEvent::from_context(
                &audit,
                "payment.request_created",
                AuditCategory::Payment,
                AuditOutcome::Success,
            )
            .with_metadata("transaction_id", request.transaction_id.0.clone())
            .with_metadata("amount", request.amount.to_string())
            .with_metadata("currency", request.currency.clone()),
        );
        info!(
            event_name = "payment.request.created",
            correlation_id = %audit.correlation_id,
            transaction_id = %request.transaction_id,
            amount = %request.amount,
            currency = %request.currency,
            "standalone payment request created"
        );
        Ok(request)
    }

    /// Marks a request paid and propagates to its order. Confirming an already
    /// paid request returns it unchanged.
    pub async fn confirm_payment(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get_payment(transaction_id).await?;
        let audit = self.audit_context(payment.order_id.as_ref(), None);
        if payment.status == PaymentStatus::Paid {
            info!(
                event_name = "payment.confirm.repeated",
                transaction_id = %transaction_id,
                "payment already confirmed"
            );
            // an earlier confirmation may have stopped before the order was carried to paid
            self.settle_linked_order(&payment, &audit).await?;
            return Ok(payment);
        }

        let step = self.payment_flow.apply_with_audit(
            &payment.status,
            &FlowEvent::PaymentConfirmed,
            self.audit.as_ref(),
            &audit,
        )?;

        let applied = self
            .payments
            .update_status(transaction_id, &payment.status, &step.to, Utc::now())
            .await?;
        if !applied {
            let current = self.get_payment(transaction_id).await?;
            if current.status == PaymentStatus::Paid {
                self.settle_linked_order(&current, &audit).await?;
                return Ok(current);
            }
            return Err(FlowTransitionError::invalid(
                FlowType::Payment,
                &current.status,
                &FlowEvent::PaymentConfirmed,
            )
            .into());
        }

        if step.actions.contains(&FlowAction::PropagatePaid) {
            self.settle_linked_order(&payment, &audit).await?;
        }

        info!(
            event_name = "payment.confirmed",
            correlation_id = %audit.correlation_id,
            transaction_id = %transaction_id,
            order_id = payment.order_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            "payment confirmed"
        );
        self.get_payment(transaction_id).await
    }

    async fn settle_linked_order(
        &self,
        payment: &PaymentRequest,
        audit: &AuditContext,
    ) -> Result<(), PaymentError> {
        match &payment.order_id {
            Some(order_id) => self.mark_order_paid(order_id, &payment.transaction_id, audit).await,
            None => Ok(()),
        }
    }

    /// Idempotent: an order that is already paid is left alone.
    async fn mark_order_paid(
        &self,
        order_id: &OrderId,
        transaction_id: &TransactionId,
        audit: &AuditContext,
    ) -> Result<(), PaymentError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            let event = match order.status {
                OrderStatus::Paid => return Ok(()),
                // the request is inserted before its creator links the order; link it here
                OrderStatus::Pending => FlowEvent::PaymentRequested,
                _ => FlowEvent::PaymentConfirmed,
            };

            let step =
                self.order_flow.apply_with_audit(&order.status, &event, self.audit.as_ref(), audit)?;
            let change = OrderStatusChange {
                expected: order.status.clone(),
                expected_version: order.state_version,
                next: step.to,
                payment_id: Some(transaction_id.clone()),
                at: Utc::now(),
            };
            if self.orders.update_status(order_id, change).await? && event == FlowEvent::PaymentConfirmed {
                return Ok(());
            }
        }

        Err(PaymentError::Contention { entity: "order", id: order_id.0.clone() })
    }

    /// Moves a live request to failed. The order stays awaiting payment so a
    /// fresh request can be issued.
    pub async fn fail_payment(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<PaymentRequest, PaymentError> {
        let payment = self.get_payment(transaction_id).await?;
        let audit = self.audit_context(payment.order_id.as_ref(), None);
        let step = self.payment_flow.apply_with_audit(
            &payment.status,
            &FlowEvent::PaymentFailed,
            self.audit.as_ref(),
            &audit,
        )?;

        let applied = self
            .payments
            .update_status(transaction_id, &payment.status, &step.to, Utc::now())
            .await?;
        if !applied {
            let current = self.get_payment(transaction_id).await?;
            return Err(FlowTransitionError::invalid(
                FlowType::Payment,
                &current.status,
                &FlowEvent::PaymentFailed,
            )
            .into());
        }

        self.audit.emit(
            AuditEvent::from_context(&audit, "payment.failed", AuditCategory::Payment, AuditOutcome::Failed)
                .with_metadata("transaction_id", transaction_id.0.clone())
                .with_metadata("reason", reason),
        );
        warn!(
            event_name = "payment.failed",
            correlation_id = %audit.correlation_id,
            transaction_id = %transaction_id,
            reason,
            "payment marked failed"
        );
        self.get_payment(transaction_id).await
    }

    /// Cancels an order that is not yet paid, cancelling its live request first.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, PaymentError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            let audit = self.audit_context(Some(order_id), Some(&order.session_id));
            let step = self.order_flow.apply_with_audit(
                &order.status,
                &FlowEvent::CancelRequested,
                self.audit.as_ref(),
                &audit,
            )?;

            if step.actions.contains(&FlowAction::CancelLivePayment)
                && !self.cancel_linked_payment(&order).await?
            {
                continue;
            }

            let change = OrderStatusChange {
                expected: order.status.clone(),
                expected_version: order.state_version,
                next: step.to,
                payment_id: None,
                at: Utc::now(),
            };
            if self.orders.update_status(order_id, change).await? {
                self.release_stock(order.items.iter()).await;
                info!(
                    event_name = "order.cancelled",
                    correlation_id = %audit.correlation_id,
                    order_id = %order_id,
                    "order cancelled"
                );
                return self.get_order(order_id).await;
            }
        }

        Err(PaymentError::Contention { entity: "order", id: order_id.0.clone() })
    }

    /// Returns `false` when the caller should re-read and retry.
    async fn cancel_linked_payment(&self, order: &Order) -> Result<bool, PaymentError> {
        let paid_error = || {
            PaymentError::from(FlowTransitionError::invalid(
                FlowType::Payment,
                &PaymentStatus::Paid,
                &FlowEvent::CancelRequested,
            ))
        };

        match self.payments.find_live_for_order(&order.id).await? {
            Some(live) => {
                let step = self.payment_flow.apply(&live.status, &FlowEvent::CancelRequested)?;
                let applied = self
                    .payments
                    .update_status(&live.transaction_id, &live.status, &step.to, Utc::now())
                    .await?;
                if applied {
                    return Ok(true);
                }
                let current = self.get_payment(&live.transaction_id).await?;
                if current.status == PaymentStatus::Paid {
                    return Err(paid_error());
                }
                Ok(false)
            }
            None => match &order.payment_id {
                Some(linked) if self.get_payment(linked).await?.status == PaymentStatus::Paid => {
                    Err(paid_error())
                }
                _ => Ok(true),
            },
        }
    }

    async fn release_stock<'a>(&self, items: impl Iterator<Item = &'a OrderItem>) {
        for item in items {
            match self.catalog.adjust_stock(&item.product_id, i64::from(item.quantity)).await {
                Ok(true) => {}
                Ok(false) => warn!(
                    event_name = "catalog.stock.release_skipped",
                    product_id = %item.product_id,
                    "product no longer in catalog"
                ),
                Err(error) => warn!(
                    event_name = "catalog.stock.release_failed",
                    product_id = %item.product_id,
                    error = %error,
                    "could not return stock"
                ),
            }
        }
    }

    fn audit_context(&self, order_id: Option<&OrderId>, session_id: Option<&SessionId>) -> AuditContext {
        AuditContext::new(order_id.cloned(), session_id.cloned(), Uuid::new_v4().to_string(), ACTOR)
    }
}

fn insufficient_stock(name: &str, available: u32) -> PaymentError {
    PaymentError::Validation(format!("Insufficient stock for {name}. Available: {available}"))
}
