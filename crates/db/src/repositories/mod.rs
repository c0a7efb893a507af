//! SQLite implementations of the core repository and checkpoint traits.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use concierge_core::payments::RepositoryError;
use rust_decimal::Decimal;

pub mod checkpoint;
pub mod order;
pub mod payment;
pub mod product;

pub use checkpoint::SqlCheckpointStore;
pub use order::SqlOrderRepository;
pub use payment::SqlPaymentRepository;
pub use product::SqlProductCatalog;

pub(crate) fn database(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(error.to_string())
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }
}
