use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{Balance, BillingEvent, BillingEventFilter, ChargeMetadata, CreateBillingEvent},
};

/// Result of an atomic debit attempt
#[derive(Debug, Clone)]
pub enum DebitOutcome {
    /// Balance debited and the completed event written in one transaction
    Debited { event: BillingEvent, new_balance: i64 },
    /// Balance too low; nothing was written
    Insufficient { available: i64 },
}

#[async_trait]
pub trait LedgerRepo: Send + Sync {
    /// Atomically deduct `points` and insert a `Completed` billing event.
    ///
    /// The deduction only happens when the balance covers `points`. On any
    /// error the transaction is rolled back and the balance is untouched.
    async fn debit(
        &self,
        user_id: Uuid,
        points: i64,
        metadata: ChargeMetadata,
    ) -> DbResult<DebitOutcome>;

    /// Insert a billing event outside of any debit (used for failures)
    async fn insert_event(&self, input: CreateBillingEvent) -> DbResult<BillingEvent>;

    /// Add points to a balance, creating the account if needed
    async fn credit(&self, user_id: Uuid, points: i64) -> DbResult<Balance>;

    async fn get_balance(&self, user_id: Uuid) -> DbResult<Option<Balance>>;

    async fn get_event(&self, id: Uuid) -> DbResult<Option<BillingEvent>>;

    /// Query the audit trail, newest first
    async fn list_events(&self, filter: &BillingEventFilter) -> DbResult<Vec<BillingEvent>>;
}
