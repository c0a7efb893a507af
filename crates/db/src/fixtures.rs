use chrono::Utc;
use concierge_core::domain::product::{Product, ProductId};
use concierge_core::payments::RepositoryError;
use rust_decimal::Decimal;
use tracing::info;

use crate::connection::DbPool;
use crate::repositories::database;

/// Demo catalog used by `seed` and by in-memory deployments.
const SEED_PRODUCTS: &[SeedProduct] = &[
    SeedProduct {
        id: "prod_001",
        name: "MacBook Pro 16\"",
        description: "Apple M3 Max chip, 36GB RAM, 1TB SSD",
        category: "Electronics",
        price_cents: 299_900,
        stock: 15,
    },
    SeedProduct {
        id: "prod_002",
        name: "Dell XPS 15",
        description: "Intel i9, 32GB RAM, 1TB SSD, RTX 4060",
        category: "Electronics",
        price_cents: 219_900,
        stock: 20,
    },
    SeedProduct {
        id: "prod_003",
        name: "ThinkPad X1 Carbon",
        description: "Intel i7, 16GB RAM, 512GB SSD, Business laptop",
        category: "Electronics",
        price_cents: 159_900,
        stock: 25,
    },
    SeedProduct {
        id: "prod_004",
        name: "iPhone 15 Pro",
        description: "256GB, Titanium Blue, A17 Pro chip",
        category: "Electronics",
        price_cents: 119_900,
        stock: 50,
    },
    SeedProduct {
        id: "prod_005",
        name: "Samsung Galaxy S24 Ultra",
        description: "512GB, Snapdragon 8 Gen 3, S Pen included",
        category: "Electronics",
        price_cents: 129_900,
        stock: 40,
    },
    SeedProduct {
        id: "prod_006",
        name: "Clean Code",
        description: "A Handbook of Agile Software Craftsmanship by Robert C. Martin",
        category: "Books",
        price_cents: 3_999,
        stock: 100,
    },
    SeedProduct {
        id: "prod_007",
        name: "The Pragmatic Programmer",
        description: "Your Journey To Mastery, 20th Anniversary Edition",
        category: "Books",
        price_cents: 4_499,
        stock: 80,
    },
    SeedProduct {
        id: "prod_008",
        name: "Design Patterns",
        description: "Elements of Reusable Object-Oriented Software",
        category: "Books",
        price_cents: 5_499,
        stock: 60,
    },
    SeedProduct {
        id: "prod_009",
        name: "Nike Air Max 270",
        description: "Men's running shoes, Size 9-12 available",
        category: "Clothing",
        price_cents: 14_999,
        stock: 75,
    },
    SeedProduct {
        id: "prod_010",
        name: "Levi's 501 Original Jeans",
        description: "Classic straight fit, Multiple sizes and colors",
        category: "Clothing",
        price_cents: 7_999,
        stock: 120,
    },
    SeedProduct {
        id: "prod_011",
        name: "Sony WH-1000XM5",
        description: "Wireless noise-canceling headphones, 30hr battery",
        category: "Electronics",
        price_cents: 39_999,
        stock: 35,
    },
    SeedProduct {
        id: "prod_012",
        name: "iPad Pro 12.9\"",
        description: "M2 chip, 256GB, Wi-Fi + Cellular",
        category: "Electronics",
        price_cents: 129_900,
        stock: 30,
    },
];

#[derive(Debug, Clone, Copy)]
struct SeedProduct {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: &'static str,
    price_cents: i64,
    stock: u32,
}

impl SeedProduct {
    fn to_product(self) -> Product {
        Product {
            id: ProductId(self.id.to_string()),
            name: self.name.to_string(),
            description: self.description.to_string(),
            category: self.category.to_string(),
            price: Decimal::new(self.price_cents, 2),
            stock: self.stock,
        }
    }
}

pub struct DemoCatalog;

impl DemoCatalog {
    pub fn products() -> Vec<Product> {
        SEED_PRODUCTS.iter().map(|seed| seed.to_product()).collect()
    }

    /// Upserts the demo products, resetting their stock. Safe to run repeatedly.
    pub async fn seed(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await.map_err(database)?;
        let mut inserted = 0;
        let mut refreshed = 0;
        let now = Utc::now().to_rfc3339();

        for product in Self::products() {
            let existed: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM product WHERE id = ?)")
                    .bind(&product.id.0)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(database)?;

            sqlx::query(
                "INSERT INTO product (id, name, description, category, price, stock, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    category = excluded.category,
                    price = excluded.price,
                    stock = excluded.stock",
            )
            .bind(&product.id.0)
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.price.to_string())
            .bind(i64::from(product.stock))
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(database)?;

            if existed == 1 {
                refreshed += 1;
            } else {
                inserted += 1;
            }
        }

        tx.commit().await.map_err(database)?;
        info!(event_name = "db.seed.completed", inserted, refreshed, "demo catalog seeded");
        Ok(SeedResult { inserted, refreshed })
    }

    /// Checks every demo product is present with its seeded price.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_PRODUCTS.len());
        for seed in SEED_PRODUCTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM product WHERE id = ?1 AND price = ?2)",
            )
            .bind(seed.id)
            .bind(Decimal::new(seed.price_cents, 2).to_string())
            .fetch_one(pool)
            .await
            .map_err(database)?;
            checks.push((seed.id, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<u64, RepositoryError> {
        let ids = SEED_PRODUCTS.iter().map(|seed| format!("'{}'", seed.id)).collect::<Vec<_>>();
        let result = sqlx::query(&format!("DELETE FROM product WHERE id IN ({})", ids.join(",")))
            .execute(pool)
            .await
            .map_err(database)?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: usize,
    pub refreshed: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::{DemoCatalog, SeedResult};
    use crate::repositories::test_support::migrated_pool;

    #[test]
    fn demo_ids_are_unique_and_prefixed() {
        let products = DemoCatalog::products();
        let mut ids: Vec<_> = products.iter().map(|product| product.id.0.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), products.len());
        assert!(ids.iter().all(|id| id.starts_with("prod_")));
    }

    #[tokio::test]
    async fn seed_is_idempotent_and_verifiable() {
        let pool = migrated_pool().await;

        let first = DemoCatalog::seed(&pool).await.expect("first seed");
        assert_eq!(first, SeedResult { inserted: 12, refreshed: 0 });
        let second = DemoCatalog::seed(&pool).await.expect("second seed");
        assert_eq!(second, SeedResult { inserted: 0, refreshed: 12 });

        let verification = DemoCatalog::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "{:?}", verification.checks);

        assert_eq!(DemoCatalog::clean(&pool).await.expect("clean"), 12);
        assert!(!DemoCatalog::verify(&pool).await.expect("verify").all_present);
    }
}
