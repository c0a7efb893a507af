use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::domain::conversation::{Message, TurnContext};
use concierge_core::domain::product::Product;
use concierge_core::payments::ProductCatalog;
use serde_json::{json, Value};
use tracing::info;

use super::{format_money, latest_user_text, Handler, HandlerError, HandlerReply, PRODUCT_SEARCH};

pub const RESULT_LIMIT: usize = 10;
pub const LAST_VIEWED_KEY: &str = "last_viewed_products";

const NO_RESULTS: &str =
    "I couldn't find any products matching your search. Please try different keywords.";

const FILLER_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "buy", "can", "do", "for", "find", "get", "have",
    "i", "i'd", "in", "is", "like", "list", "looking", "me", "need", "of", "or", "please", "product",
    "products", "search", "see", "show", "some", "something", "the", "there", "to", "want",
    "what", "which", "with", "would", "you", "your",
];

/// Reduces a free-form request to catalog search terms.
pub fn search_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\'' || ch == '-'))
        .filter(|word| !word.is_empty() && !FILLER_WORDS.contains(word))
        .map(singular)
        .collect()
}

fn singular(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

pub struct ProductSearchHandler {
    catalog: Arc<dyn ProductCatalog>,
}

impl ProductSearchHandler {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }

    async fn find(&self, terms: &[String]) -> Result<Vec<Product>, HandlerError> {
        let products = self.catalog.search(&terms.join(" "), RESULT_LIMIT).await?;
        if !products.is_empty() || terms.len() < 2 {
            return Ok(products);
        }

        // no product matched every term; fall back to matching any of them
        let mut merged: Vec<Product> = Vec::new();
        for term in terms {
            for product in self.catalog.search(term, RESULT_LIMIT).await? {
                if !merged.iter().any(|seen| seen.id == product.id) {
                    merged.push(product);
                }
            }
        }
        merged.truncate(RESULT_LIMIT);
        Ok(merged)
    }
}

fn render_listing(products: &[Product]) -> String {
    let mut listing = format!("I found {} product(s):\n\n", products.len());
    for (position, product) in products.iter().enumerate() {
        listing.push_str(&format!(
            "{}. {}\n   Price: {}\n   Category: {}\n   Stock: {} available\n   ID: {}\n\n",
            position + 1,
            product.name,
            format_money(product.price, "USD"),
            product.category,
            product.stock,
            product.id,
        ));
    }
    listing.push_str("To order a product, say: 'I want the first one' or 'I want product #1'");
    listing
}

fn viewed_entry(product: &Product) -> Value {
    json!({
        "id": product.id.0,
        "name": product.name,
        "price": product.price.to_string(),
        "category": product.category,
        "stock": product.stock,
    })
}

#[async_trait]
impl Handler for ProductSearchHandler {
    fn role(&self) -> &'static str {
        PRODUCT_SEARCH
    }

    async fn process(
        &self,
        messages: &[Message],
        _context: &TurnContext,
    ) -> Result<HandlerReply, HandlerError> {
        let terms = search_terms(latest_user_text(messages));
        let products = self.find(&terms).await?;
        info!(
            event_name = "agent.product_search.completed",
            terms = %terms.join(" "),
            results = products.len(),
        );

        if products.is_empty() {
            return Ok(HandlerReply::text(NO_RESULTS));
        }
        let viewed: Vec<Value> = products.iter().map(viewed_entry).collect();
        Ok(HandlerReply::text(render_listing(&products)).with_context(LAST_VIEWED_KEY, viewed))
    }
}
