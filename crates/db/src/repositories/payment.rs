use chrono::{DateTime, Utc};
use concierge_core::domain::order::OrderId;
use concierge_core::domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
use concierge_core::payments::{PaymentRepository, RepositoryError};
use sqlx::{sqlite::SqliteRow, Row};

use super::{database, parse_decimal, parse_optional_timestamp, parse_timestamp};
use crate::DbPool;

const PAYMENT_COLUMNS: &str = "transaction_id, order_id, amount, currency, description, status, \
                               created_at, updated_at, confirmed_at";

pub struct SqlPaymentRepository {
    pool: DbPool,
}

impl SqlPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PaymentRepository for SqlPaymentRepository {
    async fn insert_live(&self, request: &PaymentRequest) -> Result<bool, RepositoryError> {
        // conflict target is the partial live-request index; a primary key clash still errors
        let result = sqlx::query(
            "INSERT INTO payment_request (
                transaction_id,
                order_id,
                amount,
                currency,
                description,
                status,
                created_at,
                updated_at,
                confirmed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(order_id)
                WHERE order_id IS NOT NULL AND status IN ('pending', 'awaiting_payment')
                DO NOTHING",
        )
        .bind(&request.transaction_id.0)
        .bind(request.order_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.amount.to_string())
        .bind(&request.currency)
        .bind(request.description.as_deref())
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .bind(request.confirmed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<PaymentRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_request WHERE transaction_id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        row.map(payment_from_row).transpose()
    }

    async fn find_live_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<PaymentRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_request
             WHERE order_id = ? AND status IN ('pending', 'awaiting_payment')"
        ))
        .bind(&order_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        row.map(payment_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: &TransactionId,
        expected: &PaymentStatus,
        next: &PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let confirmed_at = (*next == PaymentStatus::Paid).then(|| at.to_rfc3339());
        let result = sqlx::query(
            "UPDATE payment_request
             SET status = ?,
                 updated_at = ?,
                 confirmed_at = COALESCE(?, confirmed_at)
             WHERE transaction_id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(at.to_rfc3339())
        .bind(confirmed_at)
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(result.rows_affected() == 1)
    }
}

fn payment_from_row(row: SqliteRow) -> Result<PaymentRequest, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status").map_err(database)?;
    let status = PaymentStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown payment status `{status_raw}`")))?;

    Ok(PaymentRequest {
        transaction_id: TransactionId(row.try_get("transaction_id").map_err(database)?),
        order_id: row.try_get::<Option<String>, _>("order_id").map_err(database)?.map(OrderId),
        amount: parse_decimal("amount", row.try_get("amount").map_err(database)?)?,
        currency: row.try_get("currency").map_err(database)?,
        description: row.try_get("description").map_err(database)?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at").map_err(database)?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at").map_err(database)?)?,
        confirmed_at: parse_optional_timestamp(
            "confirmed_at",
            row.try_get("confirmed_at").map_err(database)?,
        )?,
    })
}
