//! Shared database repository test infrastructure
//!
//! Each repository has a test module containing shared test functions that
//! take `&dyn XxxRepo`, plus SQLite setup using in-memory databases.

mod exchange_rates;
