use concierge_core::domain::conversation::Intent;

use crate::classifier::Classification;
use crate::extract::contains_amount;

pub const DOWNGRADE_CONFIDENCE_CAP: f64 = 0.5;

/// Matched against whole words, optionally with a plural or verb ending.
const PAYMENT_KEYWORDS: &[&str] = &[
    "pay", "paid", "payment", "charge", "checkout", "transaction", "invoice", "billing",
    "transfer", "refund",
];

const KEYWORD_ENDINGS: &[&str] = &["", "s", "d", "ed", "ing"];

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Allow,
    Downgrade { reason_code: &'static str, intent: Intent, confidence: f64 },
}

impl GuardrailDecision {
    /// Classification after the decision has been applied.
    pub fn apply(&self, classification: Classification) -> Classification {
        match self {
            Self::Allow => classification,
            Self::Downgrade { reason_code, intent, confidence } => Classification {
                intent: *intent,
                confidence: *confidence,
                reasoning: format!("{} (guardrail: {reason_code})", classification.reasoning),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub payment_intent_correction: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { payment_intent_correction: true }
    }
}

impl GuardrailPolicy {
    /// Deterministic post-classification checks; never consults a model.
    pub fn evaluate(&self, classification: &Classification, text: &str) -> GuardrailDecision {
        if self.payment_intent_correction
            && classification.intent == Intent::Payment
            && !mentions_payment(text)
        {
            return GuardrailDecision::Downgrade {
                reason_code: "payment_without_payment_signal",
                intent: Intent::General,
                confidence: classification.confidence.min(DOWNGRADE_CONFIDENCE_CAP),
            };
        }
        GuardrailDecision::Allow
    }
}

fn mentions_payment(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let keyword_word = lowered
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|word| !word.is_empty())
        .any(|word| word.starts_with("txn_") || is_payment_keyword(word));
    keyword_word || contains_amount(&lowered)
}

fn is_payment_keyword(word: &str) -> bool {
    PAYMENT_KEYWORDS.iter().any(|keyword| {
        word.strip_prefix(keyword)
            .is_some_and(|ending| KEYWORD_ENDINGS.contains(&ending))
    })
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::conversation::Intent;

    use super::{GuardrailDecision, GuardrailPolicy};
    use crate::classifier::Classification;

    #[test]
    fn overconfident_payment_on_a_greeting_is_downgraded() {
        let policy = GuardrailPolicy::default();
        let classification = Classification::new(Intent::Payment, 0.92, "model says payment");

        let decision = policy.evaluate(&classification, "Hello, how are you?");

        assert_eq!(
            decision,
            GuardrailDecision::Downgrade {
                reason_code: "payment_without_payment_signal",
                intent: Intent::General,
                confidence: 0.5,
            }
        );
        let applied = decision.apply(classification);
        assert_eq!(applied.intent, Intent::General);
        assert!(applied.reasoning.contains("guardrail"));
    }

    #[test]
    fn low_confidence_is_not_raised_by_the_cap() {
        let classification = Classification::new(Intent::Payment, 0.3, "unsure");
        let decision = GuardrailPolicy::default().evaluate(&classification, "good morning");
        assert!(matches!(decision, GuardrailDecision::Downgrade { confidence, .. } if confidence == 0.3));
    }

    #[test]
    fn payment_with_keyword_or_amount_is_allowed() {
        let policy = GuardrailPolicy::default();
        let classification = Classification::new(Intent::Payment, 0.9, "payment");

        assert_eq!(policy.evaluate(&classification, "I want to pay"), GuardrailDecision::Allow);
        assert_eq!(policy.evaluate(&classification, "50 EUR please"), GuardrailDecision::Allow);
        assert_eq!(
            policy.evaluate(&Classification::new(Intent::Faq, 0.9, "faq"), "hello"),
            GuardrailDecision::Allow
        );
    }

    #[test]
    fn correction_can_be_disabled() {
        let policy = GuardrailPolicy { payment_intent_correction: false };
        let classification = Classification::new(Intent::Payment, 0.9, "payment");
        assert_eq!(policy.evaluate(&classification, "hello"), GuardrailDecision::Allow);
    }

    #[test]
    fn keywords_inside_other_words_do_not_count() {
        let policy = GuardrailPolicy::default();
        let classification = Classification::new(Intent::Payment, 0.9, "payment");

        for text in ["display laptops", "show me a paypal-free repayment plan", "the chargers aisle"] {
            assert!(
                matches!(policy.evaluate(&classification, text), GuardrailDecision::Downgrade { .. }),
                "{text} should be downgraded"
            );
        }
        for text in ["paying now", "check txn_abc123", "was I charged twice?", "payments page"] {
            assert_eq!(policy.evaluate(&classification, text), GuardrailDecision::Allow, "{text}");
        }
    }
}
