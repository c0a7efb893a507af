use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::hex_suffix;
use crate::domain::order::OrderId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub const PREFIX: &'static str = "txn_";

    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, hex_suffix(16)))
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "awaiting_payment" => Some(Self::AwaitingPayment),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A live request still blocks a new request for the same order.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingPayment)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub transaction_id: TransactionId,
    pub order_id: Option<OrderId>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl PaymentRequest {
    pub fn new(
        order_id: Option<OrderId>,
        amount: Decimal,
        currency: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: TransactionId::generate(),
            order_id,
            amount,
            currency: currency.into(),
            description,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{PaymentRequest, PaymentStatus, TransactionId};

    #[test]
    fn transaction_ids_carry_prefix_and_sixteen_hex_chars() {
        let id = TransactionId::generate();
        let suffix = id.0.strip_prefix("txn_").expect("prefix");
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn only_pending_and_awaiting_are_live() {
        assert!(PaymentStatus::Pending.is_live());
        assert!(PaymentStatus::AwaitingPayment.is_live());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn new_request_starts_pending_without_confirmation() {
        let request = PaymentRequest::new(None, Decimal::new(5_000, 2), "USD", None);
        assert_eq!(request.status, PaymentStatus::Pending);
        assert!(request.confirmed_at.is_none());
        assert_eq!(PaymentStatus::parse(request.status.as_str()), Some(PaymentStatus::Pending));
    }
}
