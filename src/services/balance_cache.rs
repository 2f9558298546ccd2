use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Error from a balance cache backend
#[derive(Debug, thiserror::Error)]
#[error("Balance cache error: {0}")]
pub struct BalanceCacheError(pub String);

/// A read-side copy of user balances, refreshed after every debit.
///
/// The ledger is the source of truth; a stale or failing cache never blocks
/// a charge.
#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn refresh(&self, user_id: Uuid, balance: i64) -> Result<(), BalanceCacheError>;

    async fn get(&self, user_id: Uuid) -> Result<Option<i64>, BalanceCacheError>;
}

/// Process-local balance cache
#[derive(Debug, Default)]
pub struct InMemoryBalanceCache {
    balances: DashMap<Uuid, i64>,
}

impl InMemoryBalanceCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BalanceCache for InMemoryBalanceCache {
    async fn refresh(&self, user_id: Uuid, balance: i64) -> Result<(), BalanceCacheError> {
        self.balances.insert(user_id, balance);
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<i64>, BalanceCacheError> {
        Ok(self.balances.get(&user_id).map(|entry| *entry))
    }
}
