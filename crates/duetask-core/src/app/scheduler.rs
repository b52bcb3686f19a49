//! DelayScheduler - transition を fire_at に予約する
//!
//! # 方針
//! - 予約は DelayQueue に 1 件 push するだけ。永続状態は持たない
//! - reschedule はキャンセルしない。新しいジョブを積み、古いジョブは
//!   transition 側で AlreadyDone / NotYetDue として no-op になる
//! - キューが使えないときは呼び出し側へ ScheduleError を返す（sweep が後で拾う）

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{DueDate, ScheduledJob, TaskId, TaskStatus};
use crate::ports::{Clock, DelayQueue, QueueError, StoreError, TaskFilter, TaskStore};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("delay facility unavailable: {0}")]
    Unavailable(#[from] QueueError),

    #[error("failed to read tasks for priming: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct DelayScheduler {
    queue: Arc<dyn DelayQueue>,
}

impl DelayScheduler {
    pub fn new(queue: Arc<dyn DelayQueue>) -> Self {
        Self { queue }
    }

    /// `transition(task_id)` を `fire_at` に実行するよう予約する。
    /// 過去の `fire_at` は即時実行になる（捨てない）。
    pub async fn schedule(
        &self,
        task_id: TaskId,
        fire_at: impl Into<DueDate>,
    ) -> Result<ScheduledJob, ScheduleError> {
        let job = ScheduledJob::for_due_date(task_id, &fire_at.into());
        self.push(job).await
    }

    /// Supersede whatever was scheduled for `task_id` before.
    pub async fn reschedule(
        &self,
        task_id: TaskId,
        new_fire_at: impl Into<DueDate>,
    ) -> Result<ScheduledJob, ScheduleError> {
        let job = ScheduledJob::for_due_date(task_id, &new_fire_at.into());
        tracing::debug!(%task_id, fire_at = %job.fire_at, "rescheduling, older jobs left to no-op");
        self.push(job).await
    }

    /// Rebuild in-memory jobs for PENDING tasks that are not yet due.
    ///
    /// Overdue tasks are skipped; the reconciliation sweep owns those.
    pub async fn prime(
        &self,
        store: &dyn TaskStore,
        clock: &dyn Clock,
    ) -> Result<usize, ScheduleError> {
        let now = clock.now();
        let pending = store.query(&TaskFilter::with_status(TaskStatus::Pending)).await?;

        let mut primed = 0;
        for task in pending.iter().filter(|task| !task.is_overdue_at(now)) {
            self.push(ScheduledJob::new(task.id, task.due_at_utc())).await?;
            primed += 1;
        }

        tracing::info!(primed, "scheduled jobs rebuilt from store");
        Ok(primed)
    }

    pub(crate) async fn push(&self, job: ScheduledJob) -> Result<ScheduledJob, ScheduleError> {
        match self.queue.push(job).await {
            Ok(()) => {
                tracing::debug!(task_id = %job.task_id, fire_at = %job.fire_at, attempt = job.attempt, "job scheduled");
                Ok(job)
            }
            Err(err) => {
                tracing::warn!(task_id = %job.task_id, fire_at = %job.fire_at, error = %err, "failed to schedule job");
                Err(err.into())
            }
        }
    }

    pub async fn pending_jobs(&self) -> usize {
        self.queue.len().await
    }
}

/// Fire time for a retry after `delay`, saturating on absurd delays.
pub(crate) fn retry_fire_at(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::transition::tests::{pending_task, t0};
    use crate::impls::{InMemoryDelayQueue, InMemoryTaskStore};
    use crate::ports::FixedClock;
    use chrono::{FixedOffset, TimeZone};
    use std::time::Duration;
    use ulid::Ulid;

    fn scheduler(clock: FixedClock) -> (DelayScheduler, Arc<InMemoryDelayQueue<FixedClock>>) {
        let queue = Arc::new(InMemoryDelayQueue::new(clock));
        (DelayScheduler::new(queue.clone()), queue)
    }

    #[tokio::test]
    async fn schedule_normalizes_zoned_fire_at_to_utc() {
        let (scheduler, _queue) = scheduler(FixedClock::new(t0()));
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let fire_at = tokyo.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();

        let job = scheduler.schedule(TaskId::from_ulid(Ulid::new()), fire_at).await.unwrap();
        assert_eq!(job.fire_at, t0());
        assert_eq!(job.attempt, 0);
    }

    #[tokio::test]
    async fn past_fire_at_is_kept_and_fires_immediately() {
        let (scheduler, queue) = scheduler(FixedClock::new(t0()));
        let id = TaskId::from_ulid(Ulid::new());
        scheduler.schedule(id, t0() - chrono::Duration::days(3)).await.unwrap();

        let job = queue.pop_due(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(job.task_id, id);
    }

    #[tokio::test]
    async fn reschedule_adds_a_job_without_cancelling() {
        let (scheduler, _queue) = scheduler(FixedClock::new(t0()));
        let id = TaskId::from_ulid(Ulid::new());
        scheduler.schedule(id, t0() + chrono::Duration::hours(10)).await.unwrap();
        scheduler.reschedule(id, t0() + chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(scheduler.pending_jobs().await, 2);
    }

    #[tokio::test]
    async fn closed_queue_fails_loudly() {
        let (scheduler, queue) = scheduler(FixedClock::new(t0()));
        queue.close();

        let err = scheduler
            .schedule(TaskId::from_ulid(Ulid::new()), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Unavailable(QueueError::Closed)));
    }

    #[tokio::test]
    async fn prime_schedules_only_future_pending_tasks() {
        let future = pending_task(t0() + chrono::Duration::hours(2));
        let overdue = pending_task(t0() - chrono::Duration::hours(2));
        let mut done = pending_task(t0() + chrono::Duration::hours(4));
        done.status = TaskStatus::Done;
        let store = InMemoryTaskStore::with_tasks([future.clone(), overdue, done]).await;

        let clock = FixedClock::new(t0());
        let (scheduler, queue) = scheduler(clock.clone());
        let primed = scheduler.prime(&store, &clock).await.unwrap();

        assert_eq!(primed, 1);
        clock.set(t0() + chrono::Duration::hours(2));
        let job = queue.pop_due(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(job.task_id, future.id);
    }

    #[test]
    fn retry_fire_at_saturates() {
        assert_eq!(retry_fire_at(t0(), Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            retry_fire_at(t0(), Duration::from_secs(2)),
            t0() + chrono::Duration::seconds(2)
        );
    }
}
