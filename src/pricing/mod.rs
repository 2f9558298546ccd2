//! Price resolution.
//!
//! A model's effective price comes from, in order:
//! 1. the catalog (operator-set records, then auto-derived ones, then a
//!    model-family alias), see [`resolve`]
//! 2. the fallback table of family keyword prices, see [`DefaultPricingTable`]
//! 3. a generic mid-tier price when nothing matches at all
//!
//! All prices are in the billing currency per 1000 units.

mod defaults;
mod resolver;

pub use defaults::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
pub use resolver::*;

use crate::models::{PriceRecord, ServiceKind};

/// Input and output price per 1000 units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrices {
    pub input: Decimal,
    pub output: Decimal,
}

impl UnitPrices {
    pub fn new(input: Decimal, output: Decimal) -> Self {
        Self { input, output }
    }

    /// Same price for both sides
    pub fn blended(price: Decimal) -> Self {
        Self::new(price, price)
    }
}

/// The price a model resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPrice {
    /// An active catalog record
    Record(PriceRecord),
    /// The fallback table
    Default(DefaultPrice),
}

impl ResolvedPrice {
    /// Unit prices, or `None` for fixed-fee records.
    pub fn unit_prices(&self) -> Option<UnitPrices> {
        match self {
            ResolvedPrice::Record(record) if record.service_kind == ServiceKind::FixedFee => None,
            ResolvedPrice::Record(record) => Some(UnitPrices::new(
                record.input_unit_price,
                record.output_unit_price,
            )),
            ResolvedPrice::Default(default) => Some(default.prices),
        }
    }

    /// The flat fee of a fixed-fee record.
    pub fn fixed_fee(&self) -> Option<Decimal> {
        match self {
            ResolvedPrice::Record(record) if record.service_kind == ServiceKind::FixedFee => {
                Some(record.fixed_fee.unwrap_or(Decimal::ZERO))
            }
            _ => None,
        }
    }

    /// Whether an operator set this price
    pub fn is_operator_set(&self) -> bool {
        matches!(self, ResolvedPrice::Record(record) if record.is_operator_set())
    }

    pub fn record(&self) -> Option<&PriceRecord> {
        match self {
            ResolvedPrice::Record(record) => Some(record),
            ResolvedPrice::Default(_) => None,
        }
    }
}

/// Price per 1000 units implied by a cost and a unit count.
///
/// Returns `None` when there are no units to divide by.
pub fn price_per_thousand(cost: Decimal, units: u64) -> Option<Decimal> {
    if units == 0 {
        return None;
    }
    Some(cost * Decimal::from(1000) / Decimal::from(units))
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;

    #[test]
    fn test_price_per_thousand() {
        assert_eq!(price_per_thousand(dec!(0.03), 1500), Some(dec!(0.02)));
        assert_eq!(price_per_thousand(dec!(1), 0), None);
    }

    #[test]
    fn test_default_price_has_unit_prices() {
        let resolved = ResolvedPrice::Default(DefaultPrice::generic(UnitPrices::new(
            dec!(0.002),
            dec!(0.006),
        )));
        assert_eq!(
            resolved.unit_prices(),
            Some(UnitPrices::new(dec!(0.002), dec!(0.006)))
        );
        assert!(resolved.fixed_fee().is_none());
        assert!(!resolved.is_operator_set());
    }
}
