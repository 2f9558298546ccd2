mod balance;
mod billing_event;
mod exchange_rate;
mod price_record;
mod usage_report;
pub mod validators;

pub use balance::*;
pub use billing_event::*;
pub use exchange_rate::*;
pub use price_record::*;
pub use usage_report::*;
