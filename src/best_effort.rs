//! Outcome of a side effect that must never fail the operation it follows.

use serde::{Deserialize, Serialize};

/// Result of a best-effort step.
///
/// The surrounding operation has already succeeded; callers may inspect
/// this but are not required to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BestEffort<T> {
    Done(T),
    /// Not attempted (feature disabled or nothing to do)
    Skipped,
    /// Attempted and failed; the error was logged
    Failed(String),
}

impl<T> BestEffort<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, BestEffort::Failed(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            _ => None,
        }
    }
}
