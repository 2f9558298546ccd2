use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::validators::{validate_model_name, validate_non_negative};

/// Who created a price record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    /// Entered by an operator
    #[default]
    OperatorSet,
    /// Created automatically the first time an unmatched model was billed
    AutoDerived,
}

impl PriceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OperatorSet => "operator_set",
            Self::AutoDerived => "auto_derived",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto_derived" => Self::AutoDerived,
            _ => Self::OperatorSet,
        }
    }
}

/// How usage of a model is priced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Priced per 1000 input and output units
    #[default]
    TokenMetered,
    /// A flat fee per invocation, regardless of units
    FixedFee,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenMetered => "token_metered",
            Self::FixedFee => "fixed_fee",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "fixed_fee" => Self::FixedFee,
            _ => Self::TokenMetered,
        }
    }
}

/// A per-model price entry in the catalog.
///
/// Unit prices are in the billing currency per 1000 units. Records are never
/// deleted; operators deactivate them instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub id: Uuid,
    pub model_name: String,
    /// Price per 1000 input units
    pub input_unit_price: Decimal,
    /// Price per 1000 output units
    pub output_unit_price: Decimal,
    pub is_active: bool,
    pub origin: PriceOrigin,
    pub service_kind: ServiceKind,
    /// Flat fee per invocation, set only for `ServiceKind::FixedFee`
    pub fixed_fee: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceRecord {
    /// Lowercased lookup key. Model names compare case-insensitively.
    pub fn model_key(&self) -> String {
        model_key(&self.model_name)
    }

    pub fn is_operator_set(&self) -> bool {
        self.origin == PriceOrigin::OperatorSet
    }
}

/// Normalize a model name into its catalog key.
pub fn model_key(model_name: &str) -> String {
    model_name.trim().to_lowercase()
}

/// Request to create a price record
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_fixed_fee_pricing"))]
pub struct CreatePriceRecord {
    #[validate(custom(function = "validate_model_name"))]
    pub model_name: String,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub input_unit_price: Decimal,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub output_unit_price: Decimal,
    #[serde(default)]
    pub origin: PriceOrigin,
    #[serde(default)]
    pub service_kind: ServiceKind,
    #[validate(custom(function = "validate_non_negative"))]
    #[serde(default)]
    pub fixed_fee: Option<Decimal>,
}

impl CreatePriceRecord {
    /// An operator-set, token-metered record.
    pub fn token_metered(
        model_name: impl Into<String>,
        input_unit_price: Decimal,
        output_unit_price: Decimal,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            input_unit_price,
            output_unit_price,
            origin: PriceOrigin::OperatorSet,
            service_kind: ServiceKind::TokenMetered,
            fixed_fee: None,
        }
    }

    /// An operator-set, fixed-fee record.
    pub fn fixed_fee(model_name: impl Into<String>, fee: Decimal) -> Self {
        Self {
            model_name: model_name.into(),
            input_unit_price: Decimal::ZERO,
            output_unit_price: Decimal::ZERO,
            origin: PriceOrigin::OperatorSet,
            service_kind: ServiceKind::FixedFee,
            fixed_fee: Some(fee),
        }
    }

    /// An auto-derived record for a model that had no catalog entry.
    pub fn auto_derived(
        model_name: impl Into<String>,
        input_unit_price: Decimal,
        output_unit_price: Decimal,
    ) -> Self {
        Self {
            origin: PriceOrigin::AutoDerived,
            ..Self::token_metered(model_name, input_unit_price, output_unit_price)
        }
    }
}

fn validate_fixed_fee_pricing(input: &CreatePriceRecord) -> Result<(), ValidationError> {
    if input.service_kind == ServiceKind::FixedFee && input.fixed_fee.is_none() {
        let mut err = ValidationError::new("missing_fixed_fee");
        err.message = Some("Fixed-fee records require a fixed_fee".into());
        return Err(err);
    }
    Ok(())
}

/// Operator edit of an existing price record. Unset fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePriceRecord {
    #[validate(custom(function = "validate_non_negative"))]
    pub input_unit_price: Option<Decimal>,
    #[validate(custom(function = "validate_non_negative"))]
    pub output_unit_price: Option<Decimal>,
    pub service_kind: Option<ServiceKind>,
    #[validate(custom(function = "validate_non_negative"))]
    pub fixed_fee: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;

    #[test]
    fn test_origin_round_trips_through_str() {
        assert_eq!(PriceOrigin::from_str("auto_derived"), PriceOrigin::AutoDerived);
        assert_eq!(PriceOrigin::from_str("operator_set"), PriceOrigin::OperatorSet);
        assert_eq!(PriceOrigin::from_str("garbage"), PriceOrigin::OperatorSet);
    }

    #[test]
    fn test_model_key_is_case_insensitive() {
        assert_eq!(model_key("  GPT-4o "), "gpt-4o");
    }

    #[test]
    fn test_fixed_fee_requires_fee() {
        let mut input = CreatePriceRecord::fixed_fee("image-gen", dec!(0.04));
        assert!(input.validate().is_ok());
        input.fixed_fee = None;
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_negative_prices_rejected() {
        let input = CreatePriceRecord::token_metered("m", dec!(-1), dec!(1));
        assert!(input.validate().is_err());
    }
}
