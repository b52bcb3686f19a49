//! Status - タスク状態の集計
//!
//! pending / done / overdue の件数。overdue は sweep と同じ
//! `TaskFilter::overdue(now)` で数えるので、0 でなければ sweep 待ちがある。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::TaskStatus;
use crate::ports::{Clock, StoreError, TaskFilter, TaskStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub as_of: DateTime<Utc>,
    pub total: usize,
    pub pending: usize,
    pub done: usize,
    /// PENDING tasks whose due date has passed.
    pub overdue: usize,
}

impl StatusReport {
    pub async fn collect(store: &dyn TaskStore, clock: &dyn Clock) -> Result<Self, StoreError> {
        let as_of = clock.now();
        let tasks = store.query(&TaskFilter::all()).await?;

        let pending = tasks.iter().filter(|t| t.status == TaskStatus::Pending).count();
        let overdue = tasks.iter().filter(|t| t.is_overdue_at(as_of)).count();

        Ok(Self {
            as_of,
            total: tasks.len(),
            pending,
            done: tasks.len() - pending,
            overdue,
        })
    }

    pub fn is_reconciled(&self) -> bool {
        self.overdue == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::transition::tests::{pending_task, t0};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;

    #[tokio::test]
    async fn counts_by_status() {
        let mut done = pending_task(t0() - chrono::Duration::days(1));
        done.status = TaskStatus::Done;
        let store = InMemoryTaskStore::with_tasks([
            done,
            pending_task(t0() - chrono::Duration::hours(1)),
            pending_task(t0() + chrono::Duration::hours(1)),
        ])
        .await;

        let report = StatusReport::collect(&store, &FixedClock::new(t0())).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.pending, 2);
        assert_eq!(report.done, 1);
        assert_eq!(report.overdue, 1);
        assert!(!report.is_reconciled());
    }
}
