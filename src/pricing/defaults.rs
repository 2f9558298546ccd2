use rust_decimal::Decimal;

use super::UnitPrices;
use crate::config::DefaultPricingConfig;

/// Built-in family prices per 1000 units, most specific first.
///
/// Each entry matches when every token appears in the lowercased model name.
const BUILTIN_FAMILIES: &[(&[&str], (i64, u32), (i64, u32))] = &[
    (&["gpt-4o", "mini"], (15, 5), (6, 4)),
    (&["gpt-4o"], (25, 4), (1, 2)),
    (&["gpt-4", "turbo"], (1, 2), (3, 2)),
    (&["gpt-4"], (3, 2), (6, 2)),
    (&["gpt-3.5"], (5, 4), (15, 4)),
    (&["claude", "opus"], (15, 3), (75, 3)),
    (&["claude", "sonnet"], (3, 3), (15, 3)),
    (&["claude", "haiku"], (25, 5), (125, 5)),
    (&["claude"], (3, 3), (15, 3)),
    (&["gemini", "flash"], (75, 6), (3, 4)),
    (&["gemini"], (125, 5), (5, 3)),
    (&["llama"], (2, 4), (6, 4)),
    (&["mistral"], (2, 4), (6, 4)),
    (&["deepseek"], (14, 5), (28, 5)),
];

/// Returned when a model matches no family keyword.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No pricing family matches model '{model}'")]
pub struct UnresolvedPricing {
    pub model: String,
}

/// A price from the fallback table
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultPrice {
    /// Matched family, `None` for the generic price
    pub family: Option<String>,
    pub prices: UnitPrices,
}

impl DefaultPrice {
    pub fn generic(prices: UnitPrices) -> Self {
        Self {
            family: None,
            prices,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.family.is_none()
    }
}

#[derive(Debug, Clone)]
struct FamilyEntry {
    tokens: Vec<String>,
    prices: UnitPrices,
}

impl FamilyEntry {
    fn matches(&self, model_key: &str) -> bool {
        self.tokens.iter().all(|t| model_key.contains(t.as_str()))
    }

    fn label(&self) -> String {
        self.tokens.join("+")
    }
}

/// Family keyword → price table used when the catalog has no match.
///
/// Configured families are checked before the built-in ones, so they can
/// override a built-in family or add new ones.
#[derive(Debug, Clone)]
pub struct DefaultPricingTable {
    families: Vec<FamilyEntry>,
    generic: UnitPrices,
}

impl DefaultPricingTable {
    pub fn from_config(config: &DefaultPricingConfig) -> Self {
        let configured = config.families.iter().map(|f| FamilyEntry {
            tokens: vec![f.keyword.trim().to_lowercase()],
            prices: UnitPrices::new(f.input, f.output),
        });
        let builtin = BUILTIN_FAMILIES.iter().map(|(tokens, input, output)| FamilyEntry {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            prices: UnitPrices::new(
                Decimal::new(input.0, input.1),
                Decimal::new(output.0, output.1),
            ),
        });

        Self {
            families: configured.chain(builtin).collect(),
            generic: UnitPrices::new(config.generic_input, config.generic_output),
        }
    }

    /// Family price for a model, matched case-insensitively.
    pub fn family(&self, model_name: &str) -> Result<DefaultPrice, UnresolvedPricing> {
        let key = model_name.to_lowercase();
        self.families
            .iter()
            .find(|entry| entry.matches(&key))
            .map(|entry| DefaultPrice {
                family: Some(entry.label()),
                prices: entry.prices,
            })
            .ok_or_else(|| UnresolvedPricing {
                model: model_name.to_string(),
            })
    }

    /// The conservative price used when nothing else matches.
    pub fn generic(&self) -> DefaultPrice {
        DefaultPrice::generic(self.generic)
    }

    /// Family price, or the generic price when no family matches.
    pub fn lookup(&self, model_name: &str) -> DefaultPrice {
        match self.family(model_name) {
            Ok(price) => price,
            Err(e) => {
                tracing::debug!(model = %e.model, "{}; using generic default pricing", e);
                self.generic()
            }
        }
    }
}

impl Default for DefaultPricingTable {
    fn default() -> Self {
        Self::from_config(&DefaultPricingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_decimal::dec;

    use super::*;
    use crate::config::FamilyPriceConfig;

    #[rstest]
    #[case("gpt-4o-mini-2024-07-18", "gpt-4o+mini", dec!(0.00015), dec!(0.0006))]
    #[case("GPT-4o", "gpt-4o", dec!(0.0025), dec!(0.01))]
    #[case("gpt-4-0613", "gpt-4", dec!(0.03), dec!(0.06))]
    #[case("gpt-3.5-turbo", "gpt-3.5", dec!(0.0005), dec!(0.0015))]
    #[case("claude-3-opus-20240229", "claude+opus", dec!(0.015), dec!(0.075))]
    #[case("claude-3-5-haiku", "claude+haiku", dec!(0.00025), dec!(0.00125))]
    #[case("claude-instant", "claude", dec!(0.003), dec!(0.015))]
    #[case("gemini-1.5-flash", "gemini+flash", dec!(0.000075), dec!(0.0003))]
    #[case("meta-llama-3-70b", "llama", dec!(0.0002), dec!(0.0006))]
    #[case("deepseek-chat", "deepseek", dec!(0.00014), dec!(0.00028))]
    fn test_builtin_families(
        #[case] model: &str,
        #[case] family: &str,
        #[case] input: Decimal,
        #[case] output: Decimal,
    ) {
        let table = DefaultPricingTable::default();
        let price = table.family(model).unwrap();
        assert_eq!(price.family.as_deref(), Some(family));
        assert_eq!(price.prices, UnitPrices::new(input, output));
    }

    #[test]
    fn test_unknown_model_is_unresolved() {
        let table = DefaultPricingTable::default();
        let err = table.family("some-new-model").unwrap_err();
        assert_eq!(err.model, "some-new-model");

        let fallback = table.lookup("some-new-model");
        assert!(fallback.is_generic());
        assert_eq!(fallback.prices, UnitPrices::new(dec!(0.002), dec!(0.006)));
    }

    #[test]
    fn test_configured_family_overrides_builtin() {
        let config = DefaultPricingConfig {
            families: vec![FamilyPriceConfig {
                keyword: "Claude".into(),
                input: dec!(0.1),
                output: dec!(0.2),
            }],
            ..Default::default()
        };
        let table = DefaultPricingTable::from_config(&config);

        let price = table.family("claude-3-opus").unwrap();
        assert_eq!(price.prices, UnitPrices::new(dec!(0.1), dec!(0.2)));
    }
}
