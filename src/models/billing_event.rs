use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a charge attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Completed,
    Failed,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Which pricing tier produced an event's cost
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// Provider reported a total cost
    ReportedTotal,
    /// Provider reported input and output costs separately
    ReportedSplit,
    /// Provider reported a blended per-1000-unit price
    ReportedUnitPrice,
    /// A catalog price record
    Catalog,
    /// A fixed-fee catalog record
    FixedFee,
    /// The built-in table matched the model family
    FamilyDefault,
    /// Nothing matched; conservative generic price
    GenericDefault,
    /// No cost was computed (failed before pricing)
    #[default]
    None,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReportedTotal => "reported_total",
            Self::ReportedSplit => "reported_split",
            Self::ReportedUnitPrice => "reported_unit_price",
            Self::Catalog => "catalog",
            Self::FixedFee => "fixed_fee",
            Self::FamilyDefault => "family_default",
            Self::GenericDefault => "generic_default",
            Self::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "reported_total" => Self::ReportedTotal,
            "reported_split" => Self::ReportedSplit,
            "reported_unit_price" => Self::ReportedUnitPrice,
            "catalog" => Self::Catalog,
            "fixed_fee" => Self::FixedFee,
            "family_default" => Self::FamilyDefault,
            "generic_default" => Self::GenericDefault,
            _ => Self::None,
        }
    }

    /// Whether the cost came from the provider's own report.
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            Self::ReportedTotal | Self::ReportedSplit | Self::ReportedUnitPrice
        )
    }
}

/// Immutable audit record of one charge attempt.
///
/// Costs are post-margin amounts in the billing currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub model_name: String,
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    /// Whether the unit counts were estimated from source text
    pub units_estimated: bool,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub cost_source: CostSource,
    pub points_deducted: i64,
    /// Points per billing-currency unit in force when the event was priced
    pub exchange_rate_snapshot: Decimal,
    pub profit_margin_percent: u32,
    /// Whether the minimum charge floor raised the points
    pub minimum_applied: bool,
    pub status: BillingStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything the ledger needs to write an event, minus status and points.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeMetadata {
    pub model_name: String,
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    pub units_estimated: bool,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub cost_source: CostSource,
    pub exchange_rate_snapshot: Decimal,
    pub profit_margin_percent: u32,
    pub minimum_applied: bool,
}

impl ChargeMetadata {
    /// Metadata for an attempt that failed before any cost was computed.
    pub fn unpriced(
        model_name: impl Into<String>,
        exchange_rate_snapshot: Decimal,
        profit_margin_percent: u32,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            input_units: 0,
            output_units: 0,
            total_units: 0,
            units_estimated: false,
            input_cost: Decimal::ZERO,
            output_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            cost_source: CostSource::None,
            exchange_rate_snapshot,
            profit_margin_percent,
            minimum_applied: false,
        }
    }
}

/// Input for inserting a billing event
#[derive(Debug, Clone)]
pub struct CreateBillingEvent {
    pub user_id: Uuid,
    pub metadata: ChargeMetadata,
    pub points_deducted: i64,
    pub status: BillingStatus,
    pub failure_reason: Option<String>,
}

impl CreateBillingEvent {
    pub fn completed(user_id: Uuid, metadata: ChargeMetadata, points: i64) -> Self {
        Self {
            user_id,
            metadata,
            points_deducted: points,
            status: BillingStatus::Completed,
            failure_reason: None,
        }
    }

    /// A failed attempt. Nothing is deducted.
    pub fn failed(user_id: Uuid, metadata: ChargeMetadata, reason: impl Into<String>) -> Self {
        Self {
            user_id,
            metadata,
            points_deducted: 0,
            status: BillingStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Audit trail query. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct BillingEventFilter {
    pub user_id: Option<Uuid>,
    pub model_name: Option<String>,
    pub status: Option<BillingStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl BillingEventFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }
}
