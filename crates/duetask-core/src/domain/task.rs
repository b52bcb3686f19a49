use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DueDate, TaskId, TaskStatus};

/// A task record as held by the task store.
///
/// The core reads `id`, `due_date` and `status` and writes only `status`.
/// Everything else belongs to the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub due_date: DueDate,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New tasks always start as PENDING.
    pub fn new(
        id: TaskId,
        title: impl Into<String>,
        due_date: impl Into<DueDate>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            due_date: due_date.into(),
            status: TaskStatus::Pending,
            created_at,
            updated_at: None,
        }
    }

    pub fn due_at_utc(&self) -> DateTime<Utc> {
        self.due_date.to_utc()
    }

    /// PENDING のまま due date を過ぎているか
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_date.is_due_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn task_due(due: &str) -> Task {
        let created = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        Task::new(TaskId::from_ulid(Ulid::new()), "t", due.parse::<DueDate>().unwrap(), created)
    }

    #[test]
    fn new_task_is_pending() {
        let task = task_due("2025-01-01T00:00:00Z");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.updated_at.is_none());
    }

    #[test]
    fn done_task_is_never_overdue() {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let mut task = task_due("2025-01-01T00:00:00Z");
        assert!(task.is_overdue_at(now));

        task.status = TaskStatus::Done;
        assert!(!task.is_overdue_at(now));
    }

    #[test]
    fn json_shape_uses_plain_strings() {
        let task = task_due("2025-01-01T00:00:00");
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["status"], "pending");
        assert_eq!(v["due_date"], "2025-01-01T00:00:00");
        assert!(v.get("updated_at").is_none());
    }
}
