use concierge_core::domain::conversation::SessionId;
use concierge_core::domain::order::{Order, OrderId, OrderItem, OrderStatus};
use concierge_core::domain::payment::TransactionId;
use concierge_core::payments::{OrderRepository, OrderStatusChange, RepositoryError};
use sqlx::{sqlite::SqliteRow, Row};

use super::{database, parse_decimal, parse_timestamp, parse_u32};
use crate::DbPool;

const ORDER_COLUMNS: &str = "id, session_id, items_json, total, status, payment_id, state_version, \
                             created_at, updated_at";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        let items_json = serde_json::to_string(&order.items)
            .map_err(|error| RepositoryError::Decode(format!("order items: {error}")))?;

        sqlx::query(
            "INSERT INTO sales_order (
                id,
                session_id,
                items_json,
                total,
                status,
                payment_id,
                state_version,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.session_id.0)
        .bind(items_json)
        .bind(order.total.to_string())
        .bind(order.status.as_str())
        .bind(order.payment_id.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(order.state_version))
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM sales_order WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        row.map(order_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: &OrderId,
        change: OrderStatusChange,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sales_order
             SET status = ?,
                 payment_id = COALESCE(?, payment_id),
                 state_version = state_version + 1,
                 updated_at = ?
             WHERE id = ? AND status = ? AND state_version = ?",
        )
        .bind(change.next.as_str())
        .bind(change.payment_id.as_ref().map(|id| id.0.as_str()))
        .bind(change.at.to_rfc3339())
        .bind(&id.0)
        .bind(change.expected.as_str())
        .bind(i64::from(change.expected_version))
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM sales_order WHERE session_id = ? ORDER BY created_at ASC"
        ))
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.into_iter().map(order_from_row).collect()
    }
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status").map_err(database)?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    let items_raw = row.try_get::<String, _>("items_json").map_err(database)?;
    let items: Vec<OrderItem> = serde_json::from_str(&items_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid order items: {error}")))?;

    Ok(Order {
        id: OrderId(row.try_get("id").map_err(database)?),
        session_id: SessionId(row.try_get("session_id").map_err(database)?),
        items,
        total: parse_decimal("total", row.try_get("total").map_err(database)?)?,
        status,
        payment_id: row
            .try_get::<Option<String>, _>("payment_id")
            .map_err(database)?
            .map(TransactionId),
        state_version: parse_u32("state_version", row.try_get("state_version").map_err(database)?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at").map_err(database)?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at").map_err(database)?)?,
    })
}
