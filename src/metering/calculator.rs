use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::NormalizedUnits;
use crate::{
    models::{CostSource, UsageReport},
    pricing::{ResolvedPrice, UnitPrices, price_per_thousand},
};

/// Decimal places kept when a reported total is split between sides.
const SPLIT_SCALE: u32 = 10;

const THOUSAND: Decimal = Decimal::ONE_THOUSAND;

/// Post-margin costs in the billing currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub source: CostSource,
    /// Pre-margin per-1000 prices implied by a provider-reported cost
    pub derived_prices: Option<UnitPrices>,
}

/// `1 + margin/100`
pub fn margin_multiplier(margin_percent: u32) -> Decimal {
    Decimal::ONE + Decimal::from(margin_percent) / Decimal::ONE_HUNDRED
}

/// Compute the marked-up cost of a usage report.
///
/// Provider-reported costs take priority over catalog prices, in this order:
/// total cost, per-side costs, blended unit cost. Without a usable report
/// cost the resolved price is applied per side, or the fixed fee is charged
/// for fixed-fee records. Reported costs in a currency other than
/// `billing_currency` are ignored.
pub fn compute(
    units: &NormalizedUnits,
    report: &UsageReport,
    price: &ResolvedPrice,
    margin_percent: u32,
    billing_currency: &str,
) -> CostBreakdown {
    let multiplier = margin_multiplier(margin_percent);
    let input_units = units.billable_input();
    let output_units = units.billable_output();

    let report_costs_usable = report.currency_matches(billing_currency);
    if !report_costs_usable && report.has_positive_cost() {
        tracing::warn!(
            model = %report.model_name,
            currency = report.currency.as_deref().unwrap_or_default(),
            billing_currency,
            "Ignoring reported cost in foreign currency"
        );
    }

    if report_costs_usable {
        if let Some(total) = report.positive_total_cost() {
            let input_share = split_total(total, input_units, output_units, price);
            return CostBreakdown {
                input_cost: input_share * multiplier,
                output_cost: (total - input_share) * multiplier,
                total_cost: total * multiplier,
                source: CostSource::ReportedTotal,
                derived_prices: derive_prices(input_share, total - input_share, input_units, output_units),
            };
        }

        if let Some((input, output)) = report.positive_split_cost() {
            return CostBreakdown {
                input_cost: input * multiplier,
                output_cost: output * multiplier,
                total_cost: (input + output) * multiplier,
                source: CostSource::ReportedSplit,
                derived_prices: derive_prices(input, output, input_units, output_units),
            };
        }

        if let Some(unit_cost) = report.positive_unit_cost() {
            return per_unit(
                input_units,
                output_units,
                UnitPrices::blended(unit_cost),
                multiplier,
                CostSource::ReportedUnitPrice,
            )
            .with_derived(UnitPrices::blended(unit_cost));
        }
    }

    if let Some(fee) = price.fixed_fee() {
        let cost = fee * multiplier;
        return CostBreakdown {
            input_cost: cost,
            output_cost: Decimal::ZERO,
            total_cost: cost,
            source: CostSource::FixedFee,
            derived_prices: None,
        };
    }

    let source = match price {
        ResolvedPrice::Record(_) => CostSource::Catalog,
        ResolvedPrice::Default(default) if default.is_generic() => CostSource::GenericDefault,
        ResolvedPrice::Default(_) => CostSource::FamilyDefault,
    };
    let prices = price.unit_prices().unwrap_or(UnitPrices::blended(Decimal::ZERO));

    per_unit(input_units, output_units, prices, multiplier, source)
}

impl CostBreakdown {
    fn with_derived(mut self, prices: UnitPrices) -> Self {
        self.derived_prices = Some(prices);
        self
    }
}

fn per_unit(
    input_units: u64,
    output_units: u64,
    prices: UnitPrices,
    multiplier: Decimal,
    source: CostSource,
) -> CostBreakdown {
    let input_cost = Decimal::from(input_units) / THOUSAND * prices.input * multiplier;
    let output_cost = Decimal::from(output_units) / THOUSAND * prices.output * multiplier;
    CostBreakdown {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
        source,
        derived_prices: None,
    }
}

/// Input side's share of a reported total.
///
/// Weighted by unit count times unit price when prices are known, by unit
/// count alone otherwise. With no units at all everything is input.
fn split_total(total: Decimal, input_units: u64, output_units: u64, price: &ResolvedPrice) -> Decimal {
    let input_units = Decimal::from(input_units);
    let output_units = Decimal::from(output_units);

    let (input_weight, output_weight) = match price.unit_prices() {
        Some(p) if input_units * p.input + output_units * p.output > Decimal::ZERO => {
            (input_units * p.input, output_units * p.output)
        }
        _ => (input_units, output_units),
    };

    let weight = input_weight + output_weight;
    if weight.is_zero() {
        return total;
    }
    (total * input_weight / weight).round_dp(SPLIT_SCALE)
}

/// Per-1000 prices implied by pre-margin per-side costs.
///
/// A side without units takes the blended price of the whole report.
fn derive_prices(
    input_cost: Decimal,
    output_cost: Decimal,
    input_units: u64,
    output_units: u64,
) -> Option<UnitPrices> {
    let blended = price_per_thousand(input_cost + output_cost, input_units + output_units)?;
    Some(UnitPrices::new(
        price_per_thousand(input_cost, input_units).unwrap_or(blended),
        price_per_thousand(output_cost, output_units).unwrap_or(blended),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::dec;
    use uuid::Uuid;

    use super::*;
    use crate::{
        metering::normalize,
        models::{PriceOrigin, PriceRecord, ServiceKind},
        pricing::DefaultPrice,
    };

    fn record(input: Decimal, output: Decimal) -> ResolvedPrice {
        let now = Utc::now();
        ResolvedPrice::Record(PriceRecord {
            id: Uuid::new_v4(),
            model_name: "gpt-4".into(),
            input_unit_price: input,
            output_unit_price: output,
            is_active: true,
            origin: PriceOrigin::OperatorSet,
            service_kind: ServiceKind::TokenMetered,
            fixed_fee: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn generic() -> ResolvedPrice {
        ResolvedPrice::Default(DefaultPrice::generic(UnitPrices::new(dec!(0.002), dec!(0.006))))
    }

    #[test]
    fn test_margin_multiplier() {
        assert_eq!(margin_multiplier(0), dec!(1));
        assert_eq!(margin_multiplier(25), dec!(1.25));
        assert_eq!(margin_multiplier(150), dec!(2.5));
    }

    #[test]
    fn test_catalog_price_with_margin() {
        let report = UsageReport::new("gpt-4").with_units(1500, 800);
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &record(dec!(30), dec!(60)), 25, "USD");

        assert_eq!(cost.input_cost, dec!(56.25));
        assert_eq!(cost.output_cost, dec!(60));
        assert_eq!(cost.total_cost, dec!(116.25));
        assert_eq!(cost.source, CostSource::Catalog);
        assert!(cost.derived_prices.is_none());
    }

    #[test]
    fn test_reported_total_split_by_price_weight() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(0.09)),
            ..UsageReport::new("gpt-4").with_units(1000, 1000)
        };
        let units = normalize(&report).unwrap();
        // Output is twice as expensive, so it gets two thirds of the total.
        let cost = compute(&units, &report, &record(dec!(0.03), dec!(0.06)), 0, "USD");

        assert_eq!(cost.source, CostSource::ReportedTotal);
        assert_eq!(cost.total_cost, dec!(0.09));
        assert_eq!(cost.input_cost, dec!(0.03));
        assert_eq!(cost.output_cost, dec!(0.06));
        assert_eq!(cost.input_cost + cost.output_cost, cost.total_cost);
    }

    #[test]
    fn test_reported_total_with_zero_units_is_all_input() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(0.01)),
            ..UsageReport::new("mystery")
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &generic(), 20, "USD");

        assert_eq!(cost.total_cost, dec!(0.012));
        assert_eq!(cost.input_cost, dec!(0.012));
        assert_eq!(cost.output_cost, dec!(0));
        assert!(cost.derived_prices.is_none());
    }

    #[test]
    fn test_reported_total_derives_prices() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(0.04)),
            ..UsageReport::new("new-model").with_units(1000, 1000)
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &generic(), 0, "USD");

        // Generic prices weigh output 3:1.
        assert_eq!(cost.input_cost, dec!(0.01));
        assert_eq!(cost.output_cost, dec!(0.03));
        assert_eq!(
            cost.derived_prices,
            Some(UnitPrices::new(dec!(0.01), dec!(0.03)))
        );
    }

    #[test]
    fn test_reported_split_costs() {
        let report = UsageReport {
            reported_input_cost: Some(dec!(0.002)),
            reported_output_cost: Some(dec!(0.004)),
            ..UsageReport::new("gpt-4").with_units(100, 100)
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &record(dec!(30), dec!(60)), 50, "USD");

        assert_eq!(cost.source, CostSource::ReportedSplit);
        assert_eq!(cost.input_cost, dec!(0.003));
        assert_eq!(cost.output_cost, dec!(0.006));
        assert_eq!(cost.total_cost, dec!(0.009));
    }

    #[test]
    fn test_single_reported_side_is_billed() {
        let report = UsageReport {
            reported_input_cost: Some(dec!(5)),
            reported_output_cost: Some(Decimal::ZERO),
            ..UsageReport::new("text-embedding-3").with_units(1000, 0)
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &record(dec!(0.00002), dec!(0)), 20, "USD");

        assert_eq!(cost.source, CostSource::ReportedSplit);
        assert_eq!(cost.input_cost, dec!(6));
        assert_eq!(cost.output_cost, dec!(0));
        assert_eq!(cost.total_cost, dec!(6));
    }

    #[test]
    fn test_single_reported_side_without_units() {
        let report = UsageReport {
            reported_input_cost: Some(dec!(5)),
            ..UsageReport::new("text-embedding-3")
        };
        let units = normalize(&report).unwrap();
        assert!(units.is_zero());

        let cost = compute(&units, &report, &record(dec!(0.00002), dec!(0)), 20, "USD");
        assert_eq!(cost.source, CostSource::ReportedSplit);
        assert_eq!(cost.total_cost, dec!(6));
        assert!(cost.derived_prices.is_none());
    }

    #[test]
    fn test_reported_unit_cost() {
        let report = UsageReport {
            reported_unit_cost: Some(dec!(0.5)),
            ..UsageReport::new("gpt-4").with_units(2000, 2000)
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &record(dec!(30), dec!(60)), 0, "USD");

        assert_eq!(cost.source, CostSource::ReportedUnitPrice);
        assert_eq!(cost.total_cost, dec!(2));
    }

    #[test]
    fn test_foreign_currency_cost_ignored() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(1000)),
            currency: Some("KRW".into()),
            ..UsageReport::new("gpt-4").with_units(1000, 0)
        };
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &record(dec!(30), dec!(60)), 0, "USD");

        assert_eq!(cost.source, CostSource::Catalog);
        assert_eq!(cost.total_cost, dec!(30));
    }

    #[test]
    fn test_fixed_fee() {
        let now = Utc::now();
        let price = ResolvedPrice::Record(PriceRecord {
            id: Uuid::new_v4(),
            model_name: "image-gen".into(),
            input_unit_price: Decimal::ZERO,
            output_unit_price: Decimal::ZERO,
            is_active: true,
            origin: PriceOrigin::OperatorSet,
            service_kind: ServiceKind::FixedFee,
            fixed_fee: Some(dec!(0.04)),
            created_at: now,
            updated_at: now,
        });
        let report = UsageReport::new("image-gen").with_units(10, 10);
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &price, 25, "USD");

        assert_eq!(cost.source, CostSource::FixedFee);
        assert_eq!(cost.input_cost, dec!(0.05));
        assert_eq!(cost.output_cost, dec!(0));
        assert_eq!(cost.total_cost, dec!(0.05));
    }

    #[test]
    fn test_generic_default_source() {
        let report = UsageReport::new("mystery").with_units(1000, 1000);
        let units = normalize(&report).unwrap();
        let cost = compute(&units, &report, &generic(), 0, "USD");

        assert_eq!(cost.source, CostSource::GenericDefault);
        assert_eq!(cost.total_cost, dec!(0.008));
    }

    #[test]
    fn test_sides_always_sum_to_total() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(0.1)),
            ..UsageReport::new("gpt-4").with_units(7, 13)
        };
        let units = normalize(&report).unwrap();
        for margin in [0, 7, 33, 100] {
            let cost = compute(&units, &report, &record(dec!(0.7), dec!(1.3)), margin, "USD");
            assert_eq!(cost.input_cost + cost.output_cost, cost.total_cost);
        }
    }
}
