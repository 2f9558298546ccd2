use std::cmp::Ordering;

use crate::models::{PriceOrigin, PriceRecord, model_key};

/// Model families, most specific first. A model belongs to the first family
/// whose token it contains.
pub const MODEL_FAMILIES: &[&str] = &[
    "gpt-4o", "gpt-4", "gpt-3.5", "claude-3", "claude", "gemini", "llama", "mistral",
    "deepseek",
];

/// Family token of a model name, if it belongs to a known family.
pub fn model_family(model_name: &str) -> Option<&'static str> {
    let key = model_key(model_name);
    MODEL_FAMILIES
        .iter()
        .copied()
        .find(|family| key.contains(family))
}

/// Resolve a model's price record from the catalog.
///
/// Only active records are considered and names compare case-insensitively.
/// Tiers, first hit wins:
/// 1. operator-set, exact name
/// 2. operator-set, either name contains the other
/// 3. auto-derived, exact name
/// 4. auto-derived, either name contains the other
/// 5. a record containing the model's family token, operator-set preferred
///
/// Within a tier the longest name wins, then the earliest record, then the
/// smallest id, so the same catalog always yields the same answer.
pub fn resolve<'a>(model_name: &str, catalog: &'a [PriceRecord]) -> Option<&'a PriceRecord> {
    let key = model_key(model_name);
    if key.is_empty() {
        return None;
    }

    let active: Vec<(&PriceRecord, String)> = catalog
        .iter()
        .filter(|r| r.is_active)
        .map(|r| (r, r.model_key()))
        .filter(|(_, k)| !k.is_empty())
        .collect();

    let exact = |origin: PriceOrigin| {
        best(
            active
                .iter()
                .filter(|(r, k)| r.origin == origin && *k == key)
                .map(|(r, _)| *r),
        )
    };
    let substring = |origin: PriceOrigin| {
        best(
            active
                .iter()
                .filter(|(r, k)| r.origin == origin && (key.contains(k.as_str()) || k.contains(&key)))
                .map(|(r, _)| *r),
        )
    };

    exact(PriceOrigin::OperatorSet)
        .or_else(|| substring(PriceOrigin::OperatorSet))
        .or_else(|| exact(PriceOrigin::AutoDerived))
        .or_else(|| substring(PriceOrigin::AutoDerived))
        .or_else(|| {
            let family = model_family(&key)?;
            let in_family = |origin: PriceOrigin| {
                best(
                    active
                        .iter()
                        .filter(|(r, k)| r.origin == origin && k.contains(family))
                        .map(|(r, _)| *r),
                )
            };
            in_family(PriceOrigin::OperatorSet).or_else(|| in_family(PriceOrigin::AutoDerived))
        })
}

fn best<'a>(candidates: impl Iterator<Item = &'a PriceRecord>) -> Option<&'a PriceRecord> {
    candidates.min_by(|a, b| tie_break(a, b))
}

/// Orders preferred records first.
fn tie_break(a: &PriceRecord, b: &PriceRecord) -> Ordering {
    b.model_name
        .len()
        .cmp(&a.model_name.len())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::{Decimal, dec};
    use uuid::Uuid;

    use super::*;
    use crate::models::ServiceKind;

    fn record(name: &str, origin: PriceOrigin, price: Decimal) -> PriceRecord {
        let now = Utc::now();
        PriceRecord {
            id: Uuid::new_v4(),
            model_name: name.to_string(),
            input_unit_price: price,
            output_unit_price: price,
            is_active: true,
            origin,
            service_kind: ServiceKind::TokenMetered,
            fixed_fee: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn operator(name: &str, price: Decimal) -> PriceRecord {
        record(name, PriceOrigin::OperatorSet, price)
    }

    fn auto(name: &str, price: Decimal) -> PriceRecord {
        record(name, PriceOrigin::AutoDerived, price)
    }

    #[test]
    fn test_exact_match_ignores_case() {
        let catalog = vec![operator("GPT-4", dec!(30))];
        let hit = resolve("gpt-4", &catalog).unwrap();
        assert_eq!(hit.input_unit_price, dec!(30));
    }

    #[test]
    fn test_operator_record_beats_auto_derived() {
        // Scenario: an auto-derived exact match loses to an operator substring match.
        let catalog = vec![
            auto("gpt-4-0613", dec!(1)),
            operator("gpt-4", dec!(30)),
        ];
        let hit = resolve("gpt-4-0613", &catalog).unwrap();
        assert_eq!(hit.origin, PriceOrigin::OperatorSet);
        assert_eq!(hit.input_unit_price, dec!(30));
    }

    #[test]
    fn test_substring_matches_both_directions() {
        let catalog = vec![operator("claude-3-haiku-20240307", dec!(1))];
        assert!(resolve("claude-3-haiku", &catalog).is_some());

        let catalog = vec![operator("claude-3-haiku", dec!(1))];
        assert!(resolve("anthropic/claude-3-haiku-20240307", &catalog).is_some());
    }

    #[test]
    fn test_longest_substring_wins() {
        let catalog = vec![operator("gpt-4", dec!(30)), operator("gpt-4o", dec!(5))];
        let hit = resolve("gpt-4o-2024-08-06", &catalog).unwrap();
        assert_eq!(hit.model_name, "gpt-4o");
    }

    #[test]
    fn test_equal_length_prefers_earliest() {
        let mut older = operator("model-a", dec!(1));
        older.created_at = Utc::now() - Duration::days(1);
        let newer = operator("model-b", dec!(2));
        let catalog = vec![newer, older.clone()];

        let hit = resolve("model-a-and-model-b", &catalog).unwrap();
        assert_eq!(hit.id, older.id);
    }

    #[test]
    fn test_inactive_records_ignored() {
        let mut disabled = operator("gpt-4", dec!(30));
        disabled.is_active = false;
        let catalog = vec![disabled, auto("gpt-4", dec!(2))];

        let hit = resolve("gpt-4", &catalog).unwrap();
        assert_eq!(hit.origin, PriceOrigin::AutoDerived);
    }

    #[test]
    fn test_family_alias_tier() {
        let catalog = vec![
            auto("gemini-pro", dec!(1)),
            operator("gemini-1.5-pro", dec!(2)),
        ];
        let hit = resolve("gemini-ultra", &catalog).unwrap();
        assert_eq!(hit.origin, PriceOrigin::OperatorSet);

        assert_eq!(model_family("Claude-3-Opus"), Some("claude-3"));
        assert_eq!(model_family("gpt-4o-mini"), Some("gpt-4o"));
        assert_eq!(model_family("unknown"), None);
    }

    #[test]
    fn test_no_match() {
        let catalog = vec![operator("gpt-4", dec!(30))];
        assert!(resolve("mystery-model", &catalog).is_none());
        assert!(resolve("   ", &catalog).is_none());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let catalog = vec![
            operator("llama-3", dec!(1)),
            operator("llama-2", dec!(2)),
            auto("llama-3-70b", dec!(3)),
        ];
        let first = resolve("llama-3-70b-instruct", &catalog).map(|r| r.id);
        for _ in 0..10 {
            assert_eq!(resolve("llama-3-70b-instruct", &catalog).map(|r| r.id), first);
        }
    }
}
