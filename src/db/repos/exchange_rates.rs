use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{db::error::DbResult, models::ExchangeRate};

#[async_trait]
pub trait ExchangeRateRepo: Send + Sync {
    /// Append a rate to the history
    async fn record(
        &self,
        points_per_unit: Decimal,
        effective_at: DateTime<Utc>,
    ) -> DbResult<ExchangeRate>;

    /// Latest rate whose `effective_at` is not after `at`
    async fn effective_at(&self, at: DateTime<Utc>) -> DbResult<Option<ExchangeRate>>;

    /// Most recent rates first
    async fn list(&self, limit: i64) -> DbResult<Vec<ExchangeRate>>;
}
