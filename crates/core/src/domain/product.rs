use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price: Decimal,
    pub stock: u32,
}

impl Product {
    pub fn in_stock(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }

    /// Case-insensitive match of every query term against name, description or category.
    pub fn matches(&self, query: &str) -> bool {
        let haystack = format!("{} {} {}", self.name, self.description, self.category)
            .to_ascii_lowercase();
        let mut terms = query.split_whitespace().peekable();
        if terms.peek().is_none() {
            return true;
        }
        terms.all(|term| haystack.contains(&term.to_ascii_lowercase()))
    }
}
