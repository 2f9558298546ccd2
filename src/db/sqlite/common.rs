use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse a decimal stored as TEXT
pub fn parse_decimal(s: &str) -> DbResult<Decimal> {
    Decimal::from_str(s)
        .map_err(|e| DbError::Internal(format!("Invalid decimal '{}' in database: {}", s, e)))
}

/// Unit counts are unsigned in the model but SQLite integers are signed.
pub fn units_to_db(units: u64) -> i64 {
    i64::try_from(units).unwrap_or(i64::MAX)
}

pub fn units_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
