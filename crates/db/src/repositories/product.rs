use concierge_core::domain::product::{Product, ProductId};
use concierge_core::payments::{ProductCatalog, RepositoryError};
use sqlx::{sqlite::SqliteRow, Row};

use super::{database, parse_decimal, parse_u32};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, name, description, category, price, stock";

pub struct SqlProductCatalog {
    pool: DbPool,
}

impl SqlProductCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        sqlx::query_scalar("SELECT COUNT(1) FROM product").fetch_one(&self.pool).await.map_err(database)
    }
}

#[async_trait::async_trait]
impl ProductCatalog for SqlProductCatalog {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        row.map(product_from_row).transpose()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, RepositoryError> {
        let terms: Vec<String> =
            query.split_whitespace().map(|term| term.to_ascii_lowercase()).collect();

        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM product");
        for (index, _) in terms.iter().enumerate() {
            sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            sql.push_str("instr(lower(name || ' ' || description || ' ' || category), ?) > 0");
        }
        sql.push_str(" ORDER BY id ASC LIMIT ?");

        let mut statement = sqlx::query(&sql);
        for term in &terms {
            statement = statement.bind(term);
        }
        let rows = statement
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE product SET stock = stock + ?1 WHERE id = ?2 AND stock + ?1 >= 0",
        )
        .bind(delta)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(result.rows_affected() == 1)
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id").map_err(database)?),
        name: row.try_get("name").map_err(database)?,
        description: row.try_get("description").map_err(database)?,
        category: row.try_get("category").map_err(database)?,
        price: parse_decimal("price", row.try_get("price").map_err(database)?)?,
        stock: parse_u32("stock", row.try_get("stock").map_err(database)?)?,
    })
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::product::ProductId;
    use concierge_core::payments::ProductCatalog;
    use rust_decimal::Decimal;

    use super::SqlProductCatalog;
    use crate::fixtures::DemoCatalog;
    use crate::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn search_matches_every_term_case_insensitively() {
        let pool = migrated_pool().await;
        DemoCatalog::seed(&pool).await.expect("seed");
        let catalog = SqlProductCatalog::new(pool);

        let laptops = catalog.search("LAPTOP business", 10).await.expect("search");
        assert_eq!(laptops.len(), 1);
        assert_eq!(laptops[0].name, "ThinkPad X1 Carbon");

        let books = catalog.search("books", 2).await.expect("search");
        assert_eq!(books.len(), 2);

        let everything = catalog.search("", 100).await.expect("search");
        assert_eq!(everything.len(), DemoCatalog::products().len());
    }

    #[tokio::test]
    async fn find_by_id_decodes_price_and_stock() {
        let pool = migrated_pool().await;
        DemoCatalog::seed(&pool).await.expect("seed");
        let catalog = SqlProductCatalog::new(pool);

        let product = catalog
            .find_by_id(&ProductId("prod_006".to_string()))
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(product.price, Decimal::new(3999, 2));
        assert_eq!(product.stock, 100);
        assert!(catalog.find_by_id(&ProductId("prod_missing".to_string())).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn adjust_stock_never_goes_negative() {
        let pool = migrated_pool().await;
        DemoCatalog::seed(&pool).await.expect("seed");
        let catalog = SqlProductCatalog::new(pool);
        let id = ProductId("prod_001".to_string());

        assert!(catalog.adjust_stock(&id, -15).await.expect("reserve all"));
        assert!(!catalog.adjust_stock(&id, -1).await.expect("over-reserve"));
        assert!(catalog.adjust_stock(&id, 2).await.expect("release"));
        assert_eq!(catalog.find_by_id(&id).await.expect("lookup").expect("present").stock, 2);
        assert!(!catalog.adjust_stock(&ProductId("prod_missing".to_string()), 1).await.expect("missing"));
    }
}
