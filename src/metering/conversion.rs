use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

/// Convert a cost to whole points: `cost × points_per_unit`, rounded half
/// away from zero. Negative results clamp to zero and values beyond `i64`
/// saturate.
pub fn to_points(cost: Decimal, points_per_unit: Decimal) -> i64 {
    let points = cost
        .checked_mul(points_per_unit)
        .unwrap_or(Decimal::MAX)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    if points <= Decimal::ZERO {
        return 0;
    }
    points.to_i64().unwrap_or(i64::MAX)
}
