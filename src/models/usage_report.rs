use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validators::{validate_model_name, validate_non_negative};

/// A raw usage report from an upstream AI provider.
///
/// Every field other than the model name is optional; providers report
/// anything from full per-side costs to nothing but a model name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UsageReport {
    #[validate(custom(function = "validate_model_name"))]
    pub model_name: String,
    #[serde(default)]
    pub input_units: Option<u64>,
    #[serde(default)]
    pub output_units: Option<u64>,
    #[serde(default)]
    pub total_units: Option<u64>,
    /// Blended price per 1000 units
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub reported_unit_cost: Option<Decimal>,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub reported_total_cost: Option<Decimal>,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub reported_input_cost: Option<Decimal>,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub reported_output_cost: Option<Decimal>,
    /// ISO currency code of the reported costs (billing currency when absent)
    #[validate(length(min = 3, max = 3))]
    #[serde(default)]
    pub currency: Option<String>,
    /// Text the usage was generated for, used only to estimate missing counts
    #[serde(default)]
    pub source_text_excerpt: Option<String>,
}

fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

impl UsageReport {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub fn with_units(mut self, input: u64, output: u64) -> Self {
        self.input_units = Some(input);
        self.output_units = Some(output);
        self
    }

    pub fn with_excerpt(mut self, text: impl Into<String>) -> Self {
        self.source_text_excerpt = Some(text.into());
        self
    }

    pub fn positive_total_cost(&self) -> Option<Decimal> {
        positive(self.reported_total_cost)
    }

    /// Per-side costs when at least one side is positive. A missing or
    /// zero side counts as zero.
    pub fn positive_split_cost(&self) -> Option<(Decimal, Decimal)> {
        let input = positive(self.reported_input_cost);
        let output = positive(self.reported_output_cost);
        if input.is_none() && output.is_none() {
            return None;
        }
        Some((
            input.unwrap_or(Decimal::ZERO),
            output.unwrap_or(Decimal::ZERO),
        ))
    }

    pub fn positive_unit_cost(&self) -> Option<Decimal> {
        positive(self.reported_unit_cost)
    }

    /// A priced report carries a positive total cost or both per-side costs.
    pub fn is_priced(&self) -> bool {
        self.positive_total_cost().is_some()
            || (positive(self.reported_input_cost).is_some()
                && positive(self.reported_output_cost).is_some())
    }

    /// Whether any cost field is positive.
    pub fn has_positive_cost(&self) -> bool {
        self.positive_total_cost().is_some()
            || self.positive_split_cost().is_some()
            || self.positive_unit_cost().is_some()
    }

    /// True when reported costs are in `billing_currency` or carry no currency.
    pub fn currency_matches(&self, billing_currency: &str) -> bool {
        self.currency
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(billing_currency))
    }

    /// Copy of the report with every cost field removed.
    pub fn without_costs(&self) -> Self {
        Self {
            reported_unit_cost: None,
            reported_total_cost: None,
            reported_input_cost: None,
            reported_output_cost: None,
            currency: None,
            ..self.clone()
        }
    }
}
