//! The billing pipeline for one usage report.
//!
//! ```text
//! settings snapshot ─┐
//! UsageReport ──> normalize ──> resolve price ──> compute cost ──> points ──> enforce ──> ledger
//!                                   │
//!                                   └─> auto-derive catalog record (default-table hits only)
//! ```
//!
//! Every report produces exactly one billing event, completed or failed.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{
    BillingConfig, BillingSettingsService, LedgerError, LedgerRecorder, PriceCatalogService,
};
use crate::{
    best_effort::BestEffort,
    config::TollgateConfig,
    db::{DbError, DbPool, DbResult},
    events::{EventBus, ServerEvent},
    metering::{
        CostBreakdown, DataIntegrityFailure, InvalidCharge, NormalizedUnits, compute, enforce,
        normalize, to_points,
    },
    models::{BillingEvent, ChargeMetadata, UsageReport},
    observability::metrics,
    pricing::{DefaultPricingTable, ResolvedPrice},
};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityFailure),

    #[error(transparent)]
    InvalidCharge(#[from] InvalidCharge),

    #[error(
        "Insufficient balance: {required} points required, {available} available ({shortfall} short)"
    )]
    InsufficientBalance {
        required: i64,
        available: i64,
        shortfall: i64,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),

    #[error("Invalid usage report: {0}")]
    Validation(String),

    #[error("Billing misconfigured: {0}")]
    Configuration(String),
}

impl BillingError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::DataIntegrity(_) => "data_integrity",
            BillingError::InvalidCharge(_) => "invalid_charge",
            BillingError::InsufficientBalance { .. } => "insufficient_balance",
            BillingError::Persistence(_) => "persistence",
            BillingError::Validation(_) => "validation",
            BillingError::Configuration(_) => "configuration",
        }
    }
}

impl From<LedgerError> for BillingError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientBalance {
                required,
                available,
                shortfall,
            } => BillingError::InsufficientBalance {
                required,
                available,
                shortfall,
            },
            LedgerError::Persistence(e) => BillingError::Persistence(e),
        }
    }
}

/// Side effects that never fail a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffects {
    pub cache_refresh: BestEffort<()>,
    /// Catalog record created or found for a model priced from the
    /// fallback table
    pub auto_derived_price: BestEffort<Uuid>,
}

/// A successful charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub event: BillingEvent,
    pub new_balance: i64,
    pub cost: CostBreakdown,
    /// Threshold in points, when the charge was flagged as anomalous
    pub anomaly_threshold_points: Option<i64>,
    pub side_effects: SideEffects,
}

/// Runs usage reports through pricing, conversion and the ledger.
pub struct BillingService {
    catalog: Arc<PriceCatalogService>,
    settings: Arc<BillingSettingsService>,
    ledger: Arc<LedgerRecorder>,
    events: Arc<EventBus>,
}

impl BillingService {
    pub fn new(
        catalog: Arc<PriceCatalogService>,
        settings: Arc<BillingSettingsService>,
        ledger: Arc<LedgerRecorder>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            catalog,
            settings,
            ledger,
            events,
        }
    }

    /// Wire every service from configuration.
    pub async fn from_config(
        db: Arc<DbPool>,
        config: &TollgateConfig,
        events: Arc<EventBus>,
    ) -> DbResult<Self> {
        let defaults = &config.pricing.defaults;
        let catalog = PriceCatalogService::load(
            db.clone(),
            DefaultPricingTable::from_config(defaults),
            defaults.auto_derive,
            events.clone(),
        )
        .await?;
        let settings = BillingSettingsService::new(db.clone(), config.billing.clone());
        let ledger = LedgerRecorder::new(db, events.clone());

        Ok(Self::new(
            Arc::new(catalog),
            Arc::new(settings),
            Arc::new(ledger),
            events,
        ))
    }

    pub fn catalog(&self) -> &Arc<PriceCatalogService> {
        &self.catalog
    }

    pub fn settings(&self) -> &Arc<BillingSettingsService> {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<LedgerRecorder> {
        &self.ledger
    }

    /// Price a usage report and debit the user.
    ///
    /// On any failure nothing is deducted and a failed billing event is
    /// written (best effort when storage itself is failing).
    #[tracing::instrument(skip(self, report), fields(model = %report.model_name))]
    pub async fn process(
        &self,
        user_id: Uuid,
        report: UsageReport,
    ) -> Result<ChargeOutcome, BillingError> {
        let started = Instant::now();

        let config = match self.settings.snapshot().await {
            Ok(config) => config,
            Err(e) => {
                let metadata = ChargeMetadata::unpriced(&report.model_name, Decimal::ZERO, 0);
                return Err(self.fail(user_id, metadata, e.into(), started).await);
            }
        };
        let mut metadata = ChargeMetadata::unpriced(
            &report.model_name,
            config.exchange_rate.points_per_unit,
            config.margin_percent,
        );

        if config.exchange_rate.points_per_unit <= Decimal::ZERO {
            let error = BillingError::Configuration(format!(
                "exchange rate must be positive, got {}",
                config.exchange_rate.points_per_unit
            ));
            return Err(self.fail(user_id, metadata, error, started).await);
        }

        if let Err(e) = report.validate() {
            let error = BillingError::Validation(e.to_string());
            return Err(self.fail(user_id, metadata, error, started).await);
        }

        let report = if report.currency_matches(&config.currency) {
            report
        } else {
            tracing::warn!(
                user_id = %user_id,
                currency = report.currency.as_deref().unwrap_or_default(),
                billing_currency = %config.currency,
                "Reported costs are in a foreign currency; pricing from catalog"
            );
            report.without_costs()
        };

        let units = match normalize(&report) {
            Ok(units) => units,
            Err(e) => return Err(self.fail(user_id, metadata, e.into(), started).await),
        };
        if units.estimated {
            tracing::debug!(
                user_id = %user_id,
                input_units = units.input_units,
                output_units = units.output_units,
                "Estimated units from source text"
            );
        }

        let price = self.catalog.resolve_price(&report.model_name);
        let cost = compute(&units, &report, &price, config.margin_percent, &config.currency);
        fill_metadata(&mut metadata, &units, &cost);

        let points = to_points(cost.total_cost, config.exchange_rate.points_per_unit);
        let charge = match enforce(points, &config.limits()) {
            Ok(charge) => charge,
            Err(e) => return Err(self.fail(user_id, metadata, e.into(), started).await),
        };
        metadata.minimum_applied = charge.minimum_applied;
        if charge.minimum_applied {
            tracing::debug!(
                user_id = %user_id,
                computed_points = points,
                charged_points = charge.points,
                "Minimum charge applied"
            );
        }

        if let Some(threshold_points) = charge.anomaly {
            self.flag_anomaly(user_id, &report.model_name, charge.points, threshold_points, &cost);
        }

        let auto_derived_price = self.auto_derive(&report.model_name, &price, &cost).await;

        let receipt = match self.ledger.charge(user_id, charge.points, metadata).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let error = BillingError::from(e);
                metrics::record_charge(
                    &report.model_name,
                    error.kind(),
                    0,
                    started.elapsed().as_secs_f64(),
                );
                return Err(error);
            }
        };

        metrics::record_charge(
            &report.model_name,
            "completed",
            charge.points,
            started.elapsed().as_secs_f64(),
        );

        Ok(ChargeOutcome {
            event: receipt.event,
            new_balance: receipt.new_balance,
            cost,
            anomaly_threshold_points: charge.anomaly,
            side_effects: SideEffects {
                cache_refresh: receipt.cache_refresh,
                auto_derived_price,
            },
        })
    }

    /// Current billing settings, as a charge would see them.
    pub async fn billing_config(&self) -> DbResult<BillingConfig> {
        self.settings.snapshot().await
    }

    fn flag_anomaly(
        &self,
        user_id: Uuid,
        model: &str,
        points: i64,
        threshold_points: i64,
        cost: &CostBreakdown,
    ) {
        tracing::warn!(
            user_id = %user_id,
            model = %model,
            points,
            threshold_points,
            total_cost = %cost.total_cost,
            cost_source = cost.source.as_str(),
            "Charge exceeds anomaly threshold"
        );
        metrics::record_charge_anomaly(model);
        self.events.publish(ServerEvent::ChargeAnomaly {
            user_id,
            timestamp: Utc::now(),
            model: model.to_string(),
            points,
            threshold_points,
            total_cost: cost.total_cost,
        });
    }

    async fn auto_derive(
        &self,
        model: &str,
        price: &ResolvedPrice,
        cost: &CostBreakdown,
    ) -> BestEffort<Uuid> {
        let ResolvedPrice::Default(default) = price else {
            return BestEffort::Skipped;
        };
        let prices = cost.derived_prices.unwrap_or(default.prices);
        match self.catalog.ensure_auto_derived(model, prices).await {
            BestEffort::Done(record) => BestEffort::Done(record.id),
            BestEffort::Skipped => BestEffort::Skipped,
            BestEffort::Failed(e) => BestEffort::Failed(e),
        }
    }

    /// Record a failure that happened before the ledger was reached.
    async fn fail(
        &self,
        user_id: Uuid,
        metadata: ChargeMetadata,
        error: BillingError,
        started: Instant,
    ) -> BillingError {
        tracing::warn!(
            user_id = %user_id,
            model = %metadata.model_name,
            kind = error.kind(),
            error = %error,
            "Charge failed"
        );
        metrics::record_charge(
            &metadata.model_name,
            error.kind(),
            0,
            started.elapsed().as_secs_f64(),
        );

        let reason = error.to_string();
        if let Err(e) = self.ledger.record_failure(user_id, metadata, &reason).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to record failed billing event");
        }
        error
    }
}

fn fill_metadata(metadata: &mut ChargeMetadata, units: &NormalizedUnits, cost: &CostBreakdown) {
    metadata.input_units = units.input_units;
    metadata.output_units = units.output_units;
    metadata.total_units = units.total_units;
    metadata.units_estimated = units.estimated;
    metadata.input_cost = cost.input_cost;
    metadata.output_cost = cost.output_cost;
    metadata.total_cost = cost.total_cost;
    metadata.cost_source = cost.source;
}
