use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Upper bound on the profit margin an operator can configure.
pub const MAX_MARGIN_PERCENT: u32 = 1000;

/// Billing configuration.
///
/// These values seed the billing settings. The margin and exchange rate can
/// later be changed by operators; the stored values then take precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct BillingSettingsConfig {
    /// Profit margin applied to every cost, in percent.
    #[serde(default = "default_margin_percent")]
    pub margin_percent: u32,

    /// ISO code of the billing currency. Reported costs in any other currency
    /// are ignored.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Points per unit of the billing currency, used until an exchange rate
    /// has been recorded.
    #[serde(default = "default_points_per_unit")]
    pub default_points_per_unit: Decimal,

    /// Smallest cost any successful charge may resolve to.
    #[serde(default = "default_minimum_charge_cost")]
    pub minimum_charge_cost: Decimal,

    /// Charges above this cost are flagged as anomalies (but still charged).
    #[serde(default = "default_anomaly_threshold_cost")]
    pub anomaly_threshold_cost: Decimal,
}

impl Default for BillingSettingsConfig {
    fn default() -> Self {
        Self {
            margin_percent: default_margin_percent(),
            currency: default_currency(),
            default_points_per_unit: default_points_per_unit(),
            minimum_charge_cost: default_minimum_charge_cost(),
            anomaly_threshold_cost: default_anomaly_threshold_cost(),
        }
    }
}

impl BillingSettingsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin_percent > MAX_MARGIN_PERCENT {
            return Err(ConfigError::Validation(format!(
                "billing.margin_percent cannot exceed {}",
                MAX_MARGIN_PERCENT
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Validation(format!(
                "billing.currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }
        if self.default_points_per_unit <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "billing.default_points_per_unit must be positive".into(),
            ));
        }
        if self.minimum_charge_cost < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "billing.minimum_charge_cost cannot be negative".into(),
            ));
        }
        if self.anomaly_threshold_cost <= self.minimum_charge_cost {
            return Err(ConfigError::Validation(
                "billing.anomaly_threshold_cost must exceed minimum_charge_cost".into(),
            ));
        }
        Ok(())
    }
}

fn default_margin_percent() -> u32 {
    20
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_points_per_unit() -> Decimal {
    Decimal::from(1000)
}

fn default_minimum_charge_cost() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_anomaly_threshold_cost() -> Decimal {
    Decimal::from(10)
}

/// Pricing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Fallback prices used when no catalog record matches a model.
    #[serde(default)]
    pub defaults: DefaultPricingConfig,
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate()
    }
}

/// Fallback pricing.
///
/// ```toml
/// [pricing.defaults]
/// generic_input = "0.002"
/// generic_output = "0.006"
///
/// [[pricing.defaults.families]]
/// keyword = "qwen"
/// input = "0.0004"
/// output = "0.0012"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct DefaultPricingConfig {
    /// Price per 1000 input units when nothing else matches.
    #[serde(default = "default_generic_input")]
    pub generic_input: Decimal,

    /// Price per 1000 output units when nothing else matches.
    #[serde(default = "default_generic_output")]
    pub generic_output: Decimal,

    /// Extra family entries, checked before the built-in table.
    #[serde(default)]
    pub families: Vec<FamilyPriceConfig>,

    /// Record an auto-derived catalog entry the first time a model is priced
    /// from this table.
    #[serde(default = "default_auto_derive")]
    pub auto_derive: bool,
}

impl Default for DefaultPricingConfig {
    fn default() -> Self {
        Self {
            generic_input: default_generic_input(),
            generic_output: default_generic_output(),
            families: Vec::new(),
            auto_derive: default_auto_derive(),
        }
    }
}

impl DefaultPricingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.generic_input < Decimal::ZERO || self.generic_output < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "pricing.defaults generic prices cannot be negative".into(),
            ));
        }
        for family in &self.families {
            if family.keyword.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "pricing.defaults.families keyword cannot be empty".into(),
                ));
            }
            if family.input < Decimal::ZERO || family.output < Decimal::ZERO {
                return Err(ConfigError::Validation(format!(
                    "pricing.defaults.families '{}' prices cannot be negative",
                    family.keyword
                )));
            }
        }
        Ok(())
    }
}

fn default_generic_input() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

fn default_generic_output() -> Decimal {
    Decimal::new(6, 3) // 0.006
}

fn default_auto_derive() -> bool {
    true
}

/// A family keyword and its price per 1000 units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct FamilyPriceConfig {
    /// Case-insensitive substring of the model name.
    pub keyword: String,
    pub input: Decimal,
    pub output: Decimal,
}
