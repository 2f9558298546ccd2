mod balance_cache;
mod billing;
mod billing_settings;
mod ledger;
mod price_catalog;

pub use balance_cache::{BalanceCache, BalanceCacheError, InMemoryBalanceCache};
pub use billing::{BillingError, BillingService, ChargeOutcome, SideEffects};
pub use billing_settings::{BillingConfig, BillingSettingsService, SettingsError};
pub use ledger::{ChargeReceipt, LedgerError, LedgerRecorder};
pub use price_catalog::{CatalogError, CatalogResult, PriceCatalogService};
