use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::BalanceCache;
use crate::{
    best_effort::BestEffort,
    db::{DbError, DbPool, DbResult, DebitOutcome},
    events::{EventBus, ServerEvent},
    models::{Balance, BillingEvent, BillingEventFilter, ChargeMetadata, CreateBillingEvent},
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(
        "Insufficient balance: {required} points required, {available} available ({shortfall} short)"
    )]
    InsufficientBalance {
        required: i64,
        available: i64,
        shortfall: i64,
    },

    #[error("Ledger persistence failed: {0}")]
    Persistence(#[from] DbError),
}

/// A completed debit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub event: BillingEvent,
    pub new_balance: i64,
    pub cache_refresh: BestEffort<()>,
}

/// Debits balances and keeps the audit trail.
///
/// Charges for the same user are serialized in-process; the conditional
/// debit in storage guarantees a balance never goes negative even across
/// processes.
pub struct LedgerRecorder {
    db: Arc<DbPool>,
    events: Arc<EventBus>,
    cache: Option<Arc<dyn BalanceCache>>,
    user_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl LedgerRecorder {
    pub fn new(db: Arc<DbPool>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            events,
            cache: None,
            user_locks: DashMap::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn BalanceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.user_locks.entry(user_id).or_default().clone()
    }

    /// Deduct `points` and write a completed billing event atomically.
    ///
    /// On insufficient balance nothing is deducted and a failed event is
    /// written instead.
    pub async fn charge(
        &self,
        user_id: Uuid,
        points: i64,
        metadata: ChargeMetadata,
    ) -> Result<ChargeReceipt, LedgerError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let outcome = match self.db.ledger().debit(user_id, points, metadata.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(user_id = %user_id, points, error = %e, "Debit failed");
                let reason = format!("persistence failure: {}", e);
                if let Err(record_err) = self.record_failure(user_id, metadata, &reason).await {
                    tracing::error!(
                        user_id = %user_id,
                        error = %record_err,
                        "Failed to record failed billing event"
                    );
                }
                return Err(LedgerError::Persistence(e));
            }
        };

        match outcome {
            DebitOutcome::Debited { event, new_balance } => {
                tracing::info!(
                    user_id = %user_id,
                    billing_event_id = %event.id,
                    model = %event.model_name,
                    points,
                    new_balance,
                    "Balance debited"
                );
                self.events.publish(ServerEvent::BalanceChanged {
                    user_id,
                    timestamp: Utc::now(),
                    delta: -points,
                    new_balance,
                    billing_event_id: Some(event.id),
                });
                let cache_refresh = self.refresh_cache(user_id, new_balance).await;
                Ok(ChargeReceipt {
                    event,
                    new_balance,
                    cache_refresh,
                })
            }
            DebitOutcome::Insufficient { available } => {
                let shortfall = points - available;
                tracing::warn!(
                    user_id = %user_id,
                    model = %metadata.model_name,
                    required = points,
                    available,
                    shortfall,
                    "Insufficient balance"
                );
                let reason = format!(
                    "insufficient balance: {} required, {} available",
                    points, available
                );
                if let Err(record_err) = self.record_failure(user_id, metadata, &reason).await {
                    tracing::error!(
                        user_id = %user_id,
                        error = %record_err,
                        "Failed to record failed billing event"
                    );
                }
                Err(LedgerError::InsufficientBalance {
                    required: points,
                    available,
                    shortfall,
                })
            }
        }
    }

    /// Write a failed billing event for an attempt that charged nothing.
    pub async fn record_failure(
        &self,
        user_id: Uuid,
        metadata: ChargeMetadata,
        reason: &str,
    ) -> DbResult<BillingEvent> {
        let model = metadata.model_name.clone();
        let event = self
            .db
            .ledger()
            .insert_event(CreateBillingEvent::failed(user_id, metadata, reason))
            .await?;

        self.events.publish(ServerEvent::ChargeFailed {
            user_id,
            timestamp: Utc::now(),
            billing_event_id: Some(event.id),
            model,
            reason: reason.to_string(),
        });
        Ok(event)
    }

    /// Add points to a balance, creating it if needed.
    pub async fn credit(&self, user_id: Uuid, points: i64) -> Result<Balance, LedgerError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let balance = self.db.ledger().credit(user_id, points).await?;
        tracing::info!(user_id = %user_id, points, new_balance = balance.balance, "Balance credited");

        self.events.publish(ServerEvent::BalanceChanged {
            user_id,
            timestamp: Utc::now(),
            delta: points,
            new_balance: balance.balance,
            billing_event_id: None,
        });
        self.refresh_cache(user_id, balance.balance).await;
        Ok(balance)
    }

    /// Current balance; users without one have zero.
    pub async fn balance(&self, user_id: Uuid) -> DbResult<i64> {
        Ok(self
            .db
            .ledger()
            .get_balance(user_id)
            .await?
            .map(|b| b.balance)
            .unwrap_or(0))
    }

    pub async fn history(&self, filter: &BillingEventFilter) -> DbResult<Vec<BillingEvent>> {
        self.db.ledger().list_events(filter).await
    }

    async fn refresh_cache(&self, user_id: Uuid, balance: i64) -> BestEffort<()> {
        let Some(cache) = &self.cache else {
            return BestEffort::Skipped;
        };
        match cache.refresh(user_id, balance).await {
            Ok(()) => BestEffort::Done(()),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Balance cache refresh failed");
                BestEffort::Failed(e.to_string())
            }
        }
    }
}
