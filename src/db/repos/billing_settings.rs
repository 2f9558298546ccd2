use async_trait::async_trait;

use crate::db::error::DbResult;

/// Operator-owned billing settings persisted as key/value pairs
#[async_trait]
pub trait BillingSettingsRepo: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> DbResult<()>;
}
