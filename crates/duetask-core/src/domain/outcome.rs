//! Outcome model: the result of one status-transition attempt.
//!
//! Every business result is a variant here, never an error. Only
//! infrastructure failures travel through `Err`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DueDate, TaskStatus};

/// Result of `transition(task_id)`.
///
/// Serialized as SCREAMING_SNAKE_CASE, matching how the outcome is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionOutcome {
    /// PENDING → DONE was written (the only case with a store write).
    Transitioned,
    /// Duplicate delivery: the task was already DONE.
    AlreadyDone,
    /// Premature or stale delivery: the due date is still ahead.
    NotYetDue,
    /// The task was deleted before the job fired.
    NotFound,
}

impl TransitionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionOutcome::Transitioned => "TRANSITIONED",
            TransitionOutcome::AlreadyDone => "ALREADY_DONE",
            TransitionOutcome::NotYetDue => "NOT_YET_DUE",
            TransitionOutcome::NotFound => "NOT_FOUND",
        }
    }

    /// Whether this outcome mutated the store.
    pub fn is_write(self) -> bool {
        matches!(self, TransitionOutcome::Transitioned)
    }
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure decision for an existing task.
///
/// Order matters: DONE wins over the due-date check, which is what makes
/// repeated deliveries harmless.
pub fn decide(status: TaskStatus, due_date: &DueDate, now: DateTime<Utc>) -> TransitionOutcome {
    if status.is_terminal() {
        return TransitionOutcome::AlreadyDone;
    }
    if due_date.is_due_at(now) {
        TransitionOutcome::Transitioned
    } else {
        TransitionOutcome::NotYetDue
    }
}
