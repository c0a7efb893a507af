use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::conversation::SessionId;
use crate::domain::order::{Order, OrderId};
use crate::domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
use crate::domain::product::{Product, ProductId};
use crate::payments::repository::{
    OrderRepository, OrderStatusChange, PaymentRepository, ProductCatalog, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id.0) {
            return Err(RepositoryError::Database(format!("order `{}` already exists", order.id)));
        }
        orders.insert(order.id.0.clone(), order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&id.0).cloned())
    }

    async fn update_status(&self, id: &OrderId, change: OrderStatusChange) -> Result<bool, RepositoryError> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.get_mut(&id.0) else {
            return Ok(false);
        };
        if order.status != change.expected || order.state_version != change.expected_version {
            return Ok(false);
        }
        order.status = change.next;
        if let Some(payment_id) = change.payment_id {
            order.payment_id = Some(payment_id);
        }
        order.state_version += 1;
        order.updated_at = change.at;
        Ok(true)
    }

    async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> =
            orders.values().filter(|order| &order.session_id == session_id).cloned().collect();
        matching.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    requests: RwLock<HashMap<String, PaymentRequest>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_live(&self, request: &PaymentRequest) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        if let Some(order_id) = &request.order_id {
            let conflict = requests
                .values()
                .any(|existing| existing.order_id.as_ref() == Some(order_id) && existing.status.is_live());
            if conflict {
                return Ok(false);
            }
        }
        if requests.contains_key(&request.transaction_id.0) {
            return Err(RepositoryError::Database(format!(
                "payment `{}` already exists",
                request.transaction_id
            )));
        }
        requests.insert(request.transaction_id.0.clone(), request.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<PaymentRequest>, RepositoryError> {
        Ok(self.requests.read().await.get(&id.0).cloned())
    }

    async fn find_live_for_order(&self, order_id: &OrderId) -> Result<Option<PaymentRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|request| request.order_id.as_ref() == Some(order_id) && request.status.is_live())
            .cloned())
    }

    async fn update_status(
        &self,
        id: &TransactionId,
        expected: &PaymentStatus,
        next: &PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        let Some(request) = requests.get_mut(&id.0) else {
            return Ok(false);
        };
        if &request.status != expected {
            return Ok(false);
        }
        request.status = next.clone();
        request.updated_at = at;
        if *next == PaymentStatus::Paid {
            request.confirmed_at = Some(at);
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<Vec<Product>>,
}

impl InMemoryProductCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products: RwLock::new(products) }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.products.read().await.iter().find(|product| &product.id == id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.iter().filter(|product| product.matches(query)).take(limit).cloned().collect())
    }

    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<bool, RepositoryError> {
        let mut products = self.products.write().await;
        let Some(product) = products.iter_mut().find(|product| &product.id == id) else {
            return Ok(false);
        };
        let next = i64::from(product.stock) + delta;
        match u32::try_from(next) {
            Ok(stock) => {
                product.stock = stock;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
