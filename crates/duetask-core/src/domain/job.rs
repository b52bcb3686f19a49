//! Scheduled job: a `(task_id, fire_at)` pair handed to the delay queue.
//!
//! Jobs are never persisted. Everything they carry can be re-derived from the
//! task store, so losing them only costs latency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DueDate, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub task_id: TaskId,
    pub fire_at: DateTime<Utc>,
    /// Store-failure retries of this fire (0 for the first delivery).
    #[serde(default)]
    pub attempt: u32,
}

impl ScheduledJob {
    pub fn new(task_id: TaskId, fire_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            fire_at,
            attempt: 0,
        }
    }

    /// Build a job from a caller-supplied due date (floating dates are UTC).
    pub fn for_due_date(task_id: TaskId, due_date: &DueDate) -> Self {
        Self::new(task_id, due_date.to_utc())
    }

    /// Same task, fired again at `fire_at`, one attempt later.
    pub fn retry_at(&self, fire_at: DateTime<Utc>) -> Self {
        Self {
            task_id: self.task_id,
            fire_at,
            attempt: self.attempt + 1,
        }
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.fire_at
    }
}
