use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    config::{BillingSettingsConfig, MAX_MARGIN_PERCENT},
    db::{DbError, DbPool, DbResult},
    metering::ChargeLimits,
    models::{ExchangeRate, ExchangeRateSnapshot},
};

const MARGIN_KEY: &str = "margin_percent";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid billing setting: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// Billing parameters captured once per charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    pub margin_percent: u32,
    pub exchange_rate: ExchangeRateSnapshot,
    pub minimum_charge_cost: Decimal,
    pub anomaly_threshold_cost: Decimal,
    pub currency: String,
}

impl BillingConfig {
    pub fn limits(&self) -> ChargeLimits {
        ChargeLimits {
            minimum_charge_cost: self.minimum_charge_cost,
            anomaly_threshold_cost: self.anomaly_threshold_cost,
            points_per_unit: self.exchange_rate.points_per_unit,
        }
    }
}

/// Owner of the profit margin and the exchange rate.
///
/// Stored values win over the config file, which only seeds them.
#[derive(Clone)]
pub struct BillingSettingsService {
    db: Arc<DbPool>,
    config: BillingSettingsConfig,
}

impl BillingSettingsService {
    pub fn new(db: Arc<DbPool>, config: BillingSettingsConfig) -> Self {
        Self { db, config }
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Current margin in percent.
    pub async fn margin_percent(&self) -> DbResult<u32> {
        let Some(stored) = self.db.billing_settings().get(MARGIN_KEY).await? else {
            return Ok(self.config.margin_percent);
        };

        match stored.parse::<u32>() {
            Ok(margin) if margin <= MAX_MARGIN_PERCENT => Ok(margin),
            _ => {
                tracing::warn!(
                    value = %stored,
                    fallback = self.config.margin_percent,
                    "Ignoring invalid stored margin"
                );
                Ok(self.config.margin_percent)
            }
        }
    }

    pub async fn set_margin_percent(&self, margin_percent: u32) -> Result<(), SettingsError> {
        if margin_percent > MAX_MARGIN_PERCENT {
            return Err(SettingsError::Validation(format!(
                "margin cannot exceed {}%",
                MAX_MARGIN_PERCENT
            )));
        }
        self.db
            .billing_settings()
            .set(MARGIN_KEY, &margin_percent.to_string())
            .await?;
        tracing::info!(margin_percent, "Profit margin updated");
        Ok(())
    }

    /// Append a rate to the history. It applies to charges from
    /// `effective_at` onwards (now when unset).
    pub async fn record_exchange_rate(
        &self,
        points_per_unit: Decimal,
        effective_at: Option<DateTime<Utc>>,
    ) -> Result<ExchangeRate, SettingsError> {
        if points_per_unit <= Decimal::ZERO {
            return Err(SettingsError::Validation(
                "points per unit must be positive".into(),
            ));
        }
        let rate = self
            .db
            .exchange_rates()
            .record(points_per_unit, effective_at.unwrap_or_else(Utc::now))
            .await?;
        tracing::info!(
            points_per_unit = %rate.points_per_unit,
            effective_at = %rate.effective_at,
            "Exchange rate recorded"
        );
        Ok(rate)
    }

    /// Rate in force at `at`, or the configured default.
    pub async fn exchange_rate_at(&self, at: DateTime<Utc>) -> DbResult<ExchangeRateSnapshot> {
        Ok(match self.db.exchange_rates().effective_at(at).await? {
            Some(rate) => ExchangeRateSnapshot::from(&rate),
            None => ExchangeRateSnapshot::config_default(self.config.default_points_per_unit),
        })
    }

    pub async fn exchange_rate_history(&self, limit: i64) -> DbResult<Vec<ExchangeRate>> {
        self.db.exchange_rates().list(limit).await
    }

    /// Capture the settings in force now.
    pub async fn snapshot(&self) -> DbResult<BillingConfig> {
        Ok(BillingConfig {
            margin_percent: self.margin_percent().await?,
            exchange_rate: self.exchange_rate_at(Utc::now()).await?,
            minimum_charge_cost: self.config.minimum_charge_cost,
            anomaly_threshold_cost: self.config.anomaly_threshold_cost,
            currency: self.config.currency.clone(),
        })
    }
}
