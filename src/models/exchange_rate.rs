use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-in-time exchange rate. History is append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRate {
    pub id: Uuid,
    /// Points granted per one unit of the billing currency
    pub points_per_unit: Decimal,
    pub effective_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Where the rate in force came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Latest recorded rate
    Recorded,
    /// No rate recorded; configured default
    ConfigDefault,
}

/// The rate captured at the start of a charge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRateSnapshot {
    pub points_per_unit: Decimal,
    pub effective_at: Option<DateTime<Utc>>,
    pub origin: RateOrigin,
}

impl ExchangeRateSnapshot {
    pub fn config_default(points_per_unit: Decimal) -> Self {
        Self {
            points_per_unit,
            effective_at: None,
            origin: RateOrigin::ConfigDefault,
        }
    }
}

impl From<&ExchangeRate> for ExchangeRateSnapshot {
    fn from(rate: &ExchangeRate) -> Self {
        Self {
            points_per_unit: rate.points_per_unit,
            effective_at: Some(rate.effective_at),
            origin: RateOrigin::Recorded,
        }
    }
}
