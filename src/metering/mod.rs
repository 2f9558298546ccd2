//! The pure stages of the billing pipeline.
//!
//! ```text
//! UsageReport ──> estimator ──> calculator ──> conversion ──> enforcer
//!                 (units)       (cost)         (points)       (floor, anomaly)
//! ```
//!
//! Nothing here touches storage; the billing service wires these stages to
//! the catalog and the ledger.

mod calculator;
mod conversion;
mod enforcer;
mod estimator;

pub use calculator::*;
pub use conversion::*;
pub use enforcer::*;
pub use estimator::*;
