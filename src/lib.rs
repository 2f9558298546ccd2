//! Usage metering and billing for AI provider calls.
//!
//! A [`models::UsageReport`] goes through price resolution, unit
//! normalization, cost calculation, point conversion and the minimum-charge
//! and anomaly checks before the ledger debits the user's point balance.
//! Every report leaves exactly one billing event in the audit trail.
//!
//! [`services::BillingService`] wires the stages together; the stages
//! themselves live in [`pricing`] and [`metering`] and are pure.

pub mod best_effort;
pub mod config;
pub mod db;
pub mod events;
pub mod metering;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod services;

#[cfg(test)]
mod tests;
