mod error;
pub mod repos;
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    price_records: Arc<dyn PriceRecordRepo>,
    exchange_rates: Arc<dyn ExchangeRateRepo>,
    ledger: Arc<dyn LedgerRepo>,
    billing_settings: Arc<dyn BillingSettingsRepo>,
}

impl CachedRepos {
    fn sqlite(pool: &sqlx::SqlitePool) -> Self {
        Self {
            price_records: Arc::new(sqlite::SqlitePriceRecordRepo::new(pool.clone())),
            exchange_rates: Arc::new(sqlite::SqliteExchangeRateRepo::new(pool.clone())),
            ledger: Arc::new(sqlite::SqliteLedgerRepo::new(pool.clone())),
            billing_settings: Arc::new(sqlite::SqliteBillingSettingsRepo::new(pool.clone())),
        }
    }
}

/// Database pool.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos::sqlite(&pool);
        DbPool { pool, repos }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                let pool = DbPool::from_sqlite(pool);
                if cfg.run_migrations {
                    pool.run_migrations().await?;
                }
                Ok(pool)
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    /// Get price record repository
    pub fn price_records(&self) -> Arc<dyn PriceRecordRepo> {
        Arc::clone(&self.repos.price_records)
    }

    /// Get exchange rate repository
    pub fn exchange_rates(&self) -> Arc<dyn ExchangeRateRepo> {
        Arc::clone(&self.repos.exchange_rates)
    }

    /// Get ledger repository
    pub fn ledger(&self) -> Arc<dyn LedgerRepo> {
        Arc::clone(&self.repos.ledger)
    }

    /// Get billing settings repository
    pub fn billing_settings(&self) -> Arc<dyn BillingSettingsRepo> {
        Arc::clone(&self.repos.billing_settings)
    }

    /// Close all connections in the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
