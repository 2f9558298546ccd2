use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::UsageReport;

/// Floors applied to text-based estimates.
pub const MIN_ESTIMATED_INPUT: u64 = 50;
pub const MIN_ESTIMATED_OUTPUT: u64 = 100;
pub const MIN_ESTIMATED_TOTAL: u64 = 150;

/// Used when the excerpt is present but contains nothing countable.
pub const CONSERVATIVE_ESTIMATE: NormalizedUnits = NormalizedUnits {
    input_units: 150,
    output_units: 300,
    total_units: 450,
    estimated: true,
};

/// Unit counts after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedUnits {
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    /// Whether the counts were estimated from text
    pub estimated: bool,
}

impl NormalizedUnits {
    pub fn zero() -> Self {
        Self {
            input_units: 0,
            output_units: 0,
            total_units: 0,
            estimated: false,
        }
    }

    /// Input units to bill. Units in the total that neither side accounts
    /// for are billed as input.
    pub fn billable_input(&self) -> u64 {
        let sides = self.input_units.saturating_add(self.output_units);
        self.input_units
            .saturating_add(self.total_units.saturating_sub(sides))
    }

    pub fn billable_output(&self) -> u64 {
        self.output_units
    }

    pub fn is_zero(&self) -> bool {
        self.total_units == 0 && self.input_units == 0 && self.output_units == 0
    }
}

/// Zero usage, zero cost and no text to estimate from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Usage report for '{model}' has no unit counts, no cost and no text excerpt to estimate from"
)]
pub struct DataIntegrityFailure {
    pub model: String,
}

/// Normalize a report's unit counts, estimating them from text when missing.
///
/// Reported counts pass through unchanged (a missing total becomes
/// `input + output`). A report with no counts but a positive cost passes
/// through as zero units and is priced from its cost.
pub fn normalize(report: &UsageReport) -> Result<NormalizedUnits, DataIntegrityFailure> {
    let input = report.input_units.unwrap_or(0);
    let output = report.output_units.unwrap_or(0);
    let sides = input.saturating_add(output);
    let total = report.total_units.unwrap_or(0);

    if total > 0 || sides > 0 {
        return Ok(NormalizedUnits {
            input_units: input,
            output_units: output,
            total_units: total.max(sides),
            estimated: false,
        });
    }

    if report.has_positive_cost() {
        return Ok(NormalizedUnits::zero());
    }

    match report.source_text_excerpt.as_deref() {
        Some(text) => Ok(estimate_from_text(text)),
        None => Err(DataIntegrityFailure {
            model: report.model_name.clone(),
        }),
    }
}

/// Estimate units from text.
///
/// CJK characters count as 1/1.5 of a unit, anything else as 1/4, plus 10%
/// overhead, rounded up. One third is attributed to input and two thirds to
/// output, with floors on each side and on the total.
pub fn estimate_from_text(text: &str) -> NormalizedUnits {
    let (cjk, other) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0u64, 0u64), |(cjk, other), c| {
            if is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });

    let raw = Decimal::from(cjk) * Decimal::new(2, 0) / Decimal::new(3, 0)
        + Decimal::from(other) / Decimal::new(4, 0);
    let estimate = ceil_units(raw * Decimal::new(11, 1));

    if estimate == 0 {
        return CONSERVATIVE_ESTIMATE;
    }

    let input = ceil_units(Decimal::from(estimate) / Decimal::new(3, 0)).max(MIN_ESTIMATED_INPUT);
    let output = ceil_units(Decimal::from(estimate) * Decimal::new(2, 0) / Decimal::new(3, 0))
        .max(MIN_ESTIMATED_OUTPUT);

    NormalizedUnits {
        input_units: input,
        output_units: output,
        total_units: (input + output).max(MIN_ESTIMATED_TOTAL),
        estimated: true,
    }
}

fn ceil_units(value: Decimal) -> u64 {
    use rust_decimal::prelude::ToPrimitive;

    value
        .round_dp_with_strategy(0, RoundingStrategy::ToPositiveInfinity)
        .to_u64()
        .unwrap_or(u64::MAX)
}

/// Chinese, Japanese and Korean scripts, including full-width forms.
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x11FF     // Hangul Jamo
        | 0x3000..=0x303F   // CJK symbols and punctuation
        | 0x3040..=0x309F   // Hiragana
        | 0x30A0..=0x30FF   // Katakana
        | 0x3130..=0x318F   // Hangul compatibility Jamo
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFF00..=0xFFEF   // Half-width and full-width forms
        | 0x20000..=0x2A6DF // CJK extension B
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;

    #[test]
    fn test_reported_counts_pass_through() {
        let report = UsageReport::new("gpt-4").with_units(1500, 800);
        let units = normalize(&report).unwrap();
        assert_eq!(units.input_units, 1500);
        assert_eq!(units.output_units, 800);
        assert_eq!(units.total_units, 2300);
        assert!(!units.estimated);
    }

    #[test]
    fn test_total_only_is_billed_as_input() {
        let report = UsageReport {
            total_units: Some(1200),
            ..UsageReport::new("gpt-4")
        };
        let units = normalize(&report).unwrap();
        assert_eq!(units.total_units, 1200);
        assert_eq!(units.billable_input(), 1200);
        assert_eq!(units.billable_output(), 0);
    }

    #[test]
    fn test_total_never_below_sides() {
        let report = UsageReport {
            total_units: Some(10),
            ..UsageReport::new("gpt-4").with_units(100, 50)
        };
        assert_eq!(normalize(&report).unwrap().total_units, 150);
    }

    #[test]
    fn test_zero_units_with_cost_pass_through() {
        let report = UsageReport {
            reported_total_cost: Some(dec!(0.01)),
            ..UsageReport::new("gpt-4")
        };
        let units = normalize(&report).unwrap();
        assert!(units.is_zero());
        assert!(!units.estimated);
    }

    #[test]
    fn test_no_units_no_cost_no_text_fails() {
        let report = UsageReport {
            input_units: Some(0),
            output_units: Some(0),
            reported_total_cost: Some(Decimal::ZERO),
            ..UsageReport::new("gpt-4")
        };
        let err = normalize(&report).unwrap_err();
        assert_eq!(err.model, "gpt-4");
    }

    #[test]
    fn test_estimate_latin_text() {
        // 400 non-space chars / 4 = 100, +10% = 110
        let text = "abcd ".repeat(100);
        let units = estimate_from_text(&text);
        assert_eq!(units.input_units, 50); // ceil(110/3) = 37, floored to 50
        assert_eq!(units.output_units, 100); // ceil(220/3) = 74, floored to 100
        assert_eq!(units.total_units, 150);
        assert!(units.estimated);
    }

    #[test]
    fn test_estimate_large_text() {
        // 4000 chars / 4 = 1000, +10% = 1100
        let text = "a".repeat(4000);
        let units = estimate_from_text(&text);
        assert_eq!(units.input_units, 367);
        assert_eq!(units.output_units, 734);
        assert_eq!(units.total_units, 1101);
    }

    #[test]
    fn test_estimate_cjk_text() {
        // 300 CJK chars / 1.5 = 200, +10% = 220
        let text = "안녕하세요".repeat(60);
        let units = estimate_from_text(&text);
        assert_eq!(units.input_units, 74);
        assert_eq!(units.output_units, 147);
        assert_eq!(units.total_units, 221);
    }

    #[test]
    fn test_whitespace_excerpt_uses_conservative_estimate() {
        let report = UsageReport::new("gpt-4").with_excerpt("   \n\t ");
        assert_eq!(normalize(&report).unwrap(), CONSERVATIVE_ESTIMATE);
    }

    #[test]
    fn test_is_cjk() {
        assert!(is_cjk('한'));
        assert!(is_cjk('漢'));
        assert!(is_cjk('カ'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('é'));
    }
}
