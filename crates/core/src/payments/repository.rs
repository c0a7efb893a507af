use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::conversation::SessionId;
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
use crate::domain::product::{Product, ProductId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Compare-and-set status change for an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderStatusChange {
    pub expected: OrderStatus,
    pub expected_version: u32,
    pub next: OrderStatus,
    /// Replaces the linked payment when present.
    pub payment_id: Option<TransactionId>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Applies the change only if status and version still match; returns whether it applied.
    async fn update_status(&self, id: &OrderId, change: OrderStatusChange) -> Result<bool, RepositoryError>;
    async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<Order>, RepositoryError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a live request. Returns `false` without writing when the order
    /// already has a live request.
    async fn insert_live(&self, request: &PaymentRequest) -> Result<bool, RepositoryError>;
    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<PaymentRequest>, RepositoryError>;
    async fn find_live_for_order(&self, order_id: &OrderId) -> Result<Option<PaymentRequest>, RepositoryError>;
    /// Moves `expected -> next` atomically. Sets `confirmed_at` when `next` is paid.
    async fn update_status(
        &self,
        id: &TransactionId,
        expected: &PaymentStatus,
        next: &PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, RepositoryError>;
    /// Adds `delta` to stock unless the result would go negative; returns whether it applied.
    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<bool, RepositoryError>;
}
