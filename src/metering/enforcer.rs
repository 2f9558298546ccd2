use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::to_points;

/// Billing bounds for one charge, in the billing currency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeLimits {
    pub minimum_charge_cost: Decimal,
    pub anomaly_threshold_cost: Decimal,
    pub points_per_unit: Decimal,
}

impl ChargeLimits {
    pub fn minimum_points(&self) -> i64 {
        to_points(self.minimum_charge_cost, self.points_per_unit)
    }

    pub fn anomaly_threshold_points(&self) -> i64 {
        to_points(self.anomaly_threshold_cost, self.points_per_unit)
    }
}

/// Points to debit after the floor and anomaly checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcedCharge {
    pub points: i64,
    /// The computed charge was raised to the minimum
    pub minimum_applied: bool,
    /// Set to the threshold in points when the charge exceeds it
    pub anomaly: Option<i64>,
}

/// A charge that resolved to zero or fewer points.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Charge resolved to {points} points; nothing can be debited")]
pub struct InvalidCharge {
    pub points: i64,
}

/// Apply the minimum charge and flag anomalously large charges.
///
/// Anomalous charges are flagged, never capped.
pub fn enforce(points: i64, limits: &ChargeLimits) -> Result<EnforcedCharge, InvalidCharge> {
    let floor = limits.minimum_points();
    let (points, minimum_applied) = if points < floor {
        (floor, true)
    } else {
        (points, false)
    };

    if points <= 0 {
        return Err(InvalidCharge { points });
    }

    let threshold = limits.anomaly_threshold_points();
    let anomaly = (threshold > 0 && points > threshold).then_some(threshold);

    Ok(EnforcedCharge {
        points,
        minimum_applied,
        anomaly,
    })
}
