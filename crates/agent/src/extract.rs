//! Deterministic extraction of amounts, currencies, ids and list selections
//! from free-form chat text.

use std::str::FromStr;

use concierge_core::domain::order::OrderId;
use concierge_core::domain::payment::TransactionId;
use concierge_core::domain::product::ProductId;
use rust_decimal::Decimal;

const CURRENCY_CODES: &[&str] =
    &["usd", "eur", "gbp", "vnd", "jpy", "cny", "aud", "cad", "chf", "inr", "sgd"];

/// Which entry of a previously shown product list the user is pointing at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Zero-based position.
    Position(usize),
    /// "that one", "this", "it": the first listed product.
    Referenced,
}

impl Selection {
    pub fn index(&self) -> usize {
        match self {
            Self::Position(index) => *index,
            Self::Referenced => 0,
        }
    }
}

pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

/// Splits on anything that cannot be part of an amount, id or currency symbol.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric()
            || matches!(character, '$' | '€' | '£' | '₫' | '.' | ',' | '_' | '#' | '-')
        {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_end_matches(['.', ',']).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// First monetary amount in the text: `$50`, `25.99`, `1,299.00 EUR`, `2k`.
pub fn extract_amount(text: &str) -> Option<Decimal> {
    tokenize(&normalize_text(text)).iter().find_map(|token| parse_money_token(token))
}

pub fn contains_amount(text: &str) -> bool {
    extract_amount(text).is_some()
}

fn parse_money_token(token: &str) -> Option<Decimal> {
    if token.starts_with('#') || token.contains('_') {
        return None;
    }
    let (negative, unsigned) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let trimmed = unsigned.trim_start_matches(['$', '€', '£', '₫']).trim_end_matches('₫');
    let cleaned = trimmed.replace(',', "");
    if cleaned.is_empty() || !cleaned.starts_with(|ch: char| ch.is_ascii_digit()) {
        return None;
    }

    let (number_part, multiplier) = if let Some(prefix) = cleaned.strip_suffix('k') {
        (prefix.to_string(), Decimal::from(1_000))
    } else {
        (cleaned, Decimal::ONE)
    };

    let value = Decimal::from_str(&number_part).ok()? * multiplier;
    Some(if negative { -value } else { value })
}

/// ISO-4217 code named or implied by a symbol; `None` when the text is silent.
pub fn extract_currency(text: &str) -> Option<String> {
    let normalized = normalize_text(text);
    for token in tokenize(&normalized) {
        let word = token.trim_start_matches(|ch: char| ch.is_ascii_digit() || ch == '.');
        if CURRENCY_CODES.contains(&word) {
            return Some(word.to_ascii_uppercase());
        }
        let code = match word {
            "dollar" | "dollars" => "USD",
            "euro" | "euros" => "EUR",
            "pound" | "pounds" => "GBP",
            "dong" => "VND",
            _ => continue,
        };
        return Some(code.to_string());
    }
    if normalized.contains('€') {
        Some("EUR".to_string())
    } else if normalized.contains('£') {
        Some("GBP".to_string())
    } else if normalized.contains('₫') {
        Some("VND".to_string())
    } else if normalized.contains('$') {
        Some("USD".to_string())
    } else {
        None
    }
}

fn prefixed_tokens<'a>(tokens: &'a [String], prefix: &'a str) -> impl Iterator<Item = &'a String> {
    tokens.iter().filter(move |token| {
        token.len() > prefix.len()
            && token.starts_with(prefix)
            && token[prefix.len()..].chars().all(|ch| ch.is_ascii_alphanumeric())
    })
}

pub fn extract_order_id(text: &str) -> Option<OrderId> {
    let tokens = tokenize(&normalize_text(text));
    let found = prefixed_tokens(&tokens, OrderId::PREFIX).next().map(|token| OrderId(token.clone()));
    found
}

pub fn extract_transaction_id(text: &str) -> Option<TransactionId> {
    let tokens = tokenize(&normalize_text(text));
    let found =
        prefixed_tokens(&tokens, TransactionId::PREFIX).next().map(|token| TransactionId(token.clone()));
    found
}

pub fn extract_product_ids(text: &str) -> Vec<ProductId> {
    let tokens = tokenize(&normalize_text(text));
    let mut ids: Vec<ProductId> = Vec::new();
    for token in prefixed_tokens(&tokens, "prod_") {
        let id = ProductId(token.clone());
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Resolves "first", "2nd", "#3", "number 2", "that one" and similar.
pub fn extract_selection(text: &str) -> Option<Selection> {
    const ORDINALS: &[(&[&str], usize)] = &[
        (&["first", "1st", "#1"], 0),
        (&["second", "2nd", "#2"], 1),
        (&["third", "3rd", "#3"], 2),
        (&["fourth", "4th", "#4"], 3),
        (&["fifth", "5th", "#5"], 4),
    ];

    let tokens = tokenize(&normalize_text(text));
    for token in &tokens {
        if let Some((_, index)) = ORDINALS.iter().find(|(words, _)| words.contains(&token.as_str())) {
            return Some(Selection::Position(*index));
        }
        if let Some(number) = token.strip_prefix('#').and_then(|raw| raw.parse::<usize>().ok()) {
            if number > 0 {
                return Some(Selection::Position(number - 1));
            }
        }
    }
    for window in tokens.windows(2) {
        if let [marker, value] = window {
            if matches!(marker.as_str(), "number" | "no" | "item") {
                if let Ok(number) = value.parse::<usize>() {
                    if number > 0 {
                        return Some(Selection::Position(number - 1));
                    }
                }
            }
        }
    }
    if tokens.iter().any(|token| matches!(token.as_str(), "that" | "this" | "it")) {
        return Some(Selection::Referenced);
    }
    None
}

/// Requested quantity: "2 of", "x3", "qty 4", "3 units". Defaults to none.
pub fn extract_quantity(text: &str) -> Option<u32> {
    let tokens = tokenize(&normalize_text(text));
    for token in &tokens {
        if let Some(raw) = token.strip_prefix('x') {
            if let Ok(quantity) = raw.parse::<u32>() {
                return Some(quantity);
            }
        }
    }
    for window in tokens.windows(2) {
        if let [left, right] = window {
            if matches!(left.as_str(), "qty" | "quantity") {
                if let Ok(quantity) = right.parse::<u32>() {
                    return Some(quantity);
                }
            }
            if matches!(right.as_str(), "of" | "units" | "unit" | "pieces" | "copies" | "pairs") {
                if let Ok(quantity) = left.parse::<u32>() {
                    return Some(quantity);
                }
            }
        }
    }
    None
}
