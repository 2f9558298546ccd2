mod billing_settings;
pub(crate) mod common;
mod exchange_rates;
mod ledger;
mod price_records;

pub use billing_settings::SqliteBillingSettingsRepo;
pub use exchange_rates::SqliteExchangeRateRepo;
pub use ledger::SqliteLedgerRepo;
pub use price_records::SqlitePriceRecordRepo;
