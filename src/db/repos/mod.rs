mod billing_settings;
mod exchange_rates;
mod ledger;
mod price_records;

pub use billing_settings::BillingSettingsRepo;
pub use exchange_rates::ExchangeRateRepo;
pub use ledger::{DebitOutcome, LedgerRepo};
pub use price_records::PriceRecordRepo;
