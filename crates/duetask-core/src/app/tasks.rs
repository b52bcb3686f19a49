//! TaskService - CRUD 側の協調者
//!
//! タスクの作成・更新時に due date で予約を入れる。予約に失敗しても
//! 呼び出し元のリクエストは失敗させない（ログのみ。sweep が後で直す）。
//! 更新は指定されたフィールドだけを書く。ワーカーが同時に DONE にしても
//! タイトルだけの編集で PENDING に戻ることはない。

use std::sync::Arc;

use crate::domain::{DueDate, Task, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, StoreError, TaskFilter, TaskPatch, TaskStore};

use super::DelayScheduler;

/// Fields a client may change; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub due_date: Option<DueDate>,
    /// Direct status override, outside the due-date logic.
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.due_date.is_none() && self.status.is_none()
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Window over the sorted task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    scheduler: DelayScheduler,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        scheduler: DelayScheduler,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            scheduler,
        }
    }

    pub async fn create(
        &self,
        title: impl Into<String>,
        due_date: impl Into<DueDate>,
    ) -> Result<Task, StoreError> {
        let task = Task::new(self.ids.generate_task_id(), title, due_date, self.clock.now());
        self.store.save(&task).await?;
        tracing::info!(task_id = %task.id, due_at = %task.due_at_utc(), "task created");

        self.schedule_quietly(&task, false).await;
        Ok(task)
    }

    /// `None` if the task does not exist.
    pub async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Option<Task>, StoreError> {
        let Some(before) = self.store.load(id).await? else {
            return Ok(None);
        };

        let due_changed = update
            .due_date
            .as_ref()
            .is_some_and(|due| due.to_utc() != before.due_at_utc());
        let reopened = update.status == Some(TaskStatus::Pending);

        if let Some(status) = update.status
            && status != before.status
        {
            tracing::info!(task_id = %id, from = %before.status, to = %status, "direct status override");
        }

        let patch = TaskPatch {
            title: update.title,
            due_date: update.due_date,
            status: update.status,
            updated_at: Some(self.clock.now()),
        };
        let Some(task) = self.store.patch(id, &patch).await? else {
            return Ok(None);
        };
        tracing::info!(task_id = %id, due_changed, "task updated");

        if due_changed {
            self.schedule_quietly(&task, true).await;
        } else if reopened {
            self.schedule_quietly(&task, false).await;
        }
        Ok(Some(task))
    }

    pub async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            // 予約済みのジョブは NotFound で終わる
            tracing::info!(task_id = %id, "task deleted");
        }
        Ok(deleted)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.store.load(id).await
    }

    /// Sorted by due date, then id, and cut to `page`.
    pub async fn list(&self, status: Option<TaskStatus>, page: Page) -> Result<Vec<Task>, StoreError> {
        let filter = status.map(TaskFilter::with_status).unwrap_or_default();
        let mut tasks = self.store.query(&filter).await?;
        tasks.sort_by(|a, b| a.due_at_utc().cmp(&b.due_at_utc()).then(a.id.cmp(&b.id)));
        Ok(tasks.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn schedule_quietly(&self, task: &Task, reschedule: bool) {
        if task.status == TaskStatus::Done {
            return;
        }
        let result = if reschedule {
            self.scheduler.reschedule(task.id, task.due_date).await
        } else {
            self.scheduler.schedule(task.id, task.due_date).await
        };
        if let Err(err) = result {
            // 失敗は scheduler 側でログ済み
            tracing::debug!(task_id = %task.id, error = %err, "scheduling skipped, sweep will reconcile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::transition::tests::t0;
    use crate::impls::{InMemoryDelayQueue, InMemoryTaskStore};
    use crate::ports::{DelayQueue, FixedClock, UlidGenerator};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Harness {
        service: TaskService,
        queue: Arc<InMemoryDelayQueue<FixedClock>>,
        clock: FixedClock,
    }

    fn harness() -> Harness {
        let clock = FixedClock::new(t0());
        let queue = Arc::new(InMemoryDelayQueue::new(clock.clone()));
        let service = TaskService::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock.clone())),
            DelayScheduler::new(queue.clone()),
        );
        Harness {
            service,
            queue,
            clock,
        }
    }

    #[tokio::test]
    async fn create_persists_pending_and_schedules() {
        let h = harness();
        let task = h
            .service
            .create("write report", t0() + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, t0());
        assert_eq!(h.service.get(task.id).await.unwrap(), Some(task));
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn scheduling_failure_does_not_fail_create() {
        let h = harness();
        h.queue.close();

        let task = h.service.create("offline", t0()).await.unwrap();
        assert!(h.service.get(task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn due_date_change_reschedules() {
        let h = harness();
        let task = h
            .service
            .create("move me", t0() + chrono::Duration::hours(10))
            .await
            .unwrap();

        let update = TaskUpdate {
            due_date: Some((t0() + chrono::Duration::hours(1)).into()),
            ..TaskUpdate::default()
        };
        h.service.update(task.id, update).await.unwrap().unwrap();
        assert_eq!(h.queue.len().await, 2);

        h.clock.set(t0() + chrono::Duration::hours(1));
        let job = h.queue.pop_due(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.fire_at, t0() + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn title_only_update_does_not_reschedule() {
        let h = harness();
        let task = h.service.create("old", t0() + chrono::Duration::hours(1)).await.unwrap();

        let update = TaskUpdate {
            title: Some("new".into()),
            ..TaskUpdate::default()
        };
        let updated = h.service.update(task.id, update).await.unwrap().unwrap();
        assert_eq!(updated.title, "new");
        assert_eq!(updated.updated_at, Some(t0()));
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn reopening_a_done_task_schedules_it_again() {
        let h = harness();
        let task = h.service.create("reopen", t0() + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(h.queue.len().await, 1);

        let done = TaskUpdate {
            status: Some(TaskStatus::Done),
            ..TaskUpdate::default()
        };
        h.service.update(task.id, done).await.unwrap().unwrap();
        assert_eq!(h.queue.len().await, 1);

        let pending = TaskUpdate {
            status: Some(TaskStatus::Pending),
            ..TaskUpdate::default()
        };
        let reopened = h.service.update(task.id, pending).await.unwrap().unwrap();
        assert_eq!(reopened.status, TaskStatus::Pending);
        assert_eq!(h.queue.len().await, 2);
    }

    /// Commits a worker's `update_status(Done)` right before each patch lands.
    struct TransitionRacingStore {
        inner: InMemoryTaskStore,
    }

    #[async_trait]
    impl TaskStore for TransitionRacingStore {
        async fn load(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.load(id).await
        }
        async fn save(&self, task: &Task) -> Result<(), StoreError> {
            self.inner.save(task).await
        }
        async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<bool, StoreError> {
            self.inner.update_status(id, status).await
        }
        async fn patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
            self.inner.update_status(id, TaskStatus::Done).await?;
            self.inner.patch(id, patch).await
        }
        async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }
        async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
            self.inner.query(filter).await
        }
    }

    #[tokio::test]
    async fn title_edit_does_not_undo_a_concurrent_transition() {
        let clock = FixedClock::new(t0());
        let store = Arc::new(TransitionRacingStore {
            inner: InMemoryTaskStore::new(),
        });
        let service = TaskService::new(
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock.clone())),
            DelayScheduler::new(Arc::new(InMemoryDelayQueue::new(clock))),
        );
        let task = service.create("racing", t0() - chrono::Duration::minutes(1)).await.unwrap();

        let update = TaskUpdate {
            title: Some("renamed".into()),
            ..TaskUpdate::default()
        };
        let updated = service.update(task.id, update).await.unwrap().unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(store.load(task.id).await.unwrap().unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn update_of_missing_task_is_none() {
        let h = harness();
        let id = TaskId::from_ulid(ulid::Ulid::new());
        assert!(h.service.update(id, TaskUpdate::default()).await.unwrap().is_none());
        assert!(!h.service.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_sorted_by_due_date() {
        let h = harness();
        let later = h.service.create("later", t0() + chrono::Duration::hours(2)).await.unwrap();
        let sooner = h.service.create("sooner", t0() + chrono::Duration::hours(1)).await.unwrap();

        let ids: Vec<_> = h
            .service
            .list(None, Page::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
        assert!(h.service.list(Some(TaskStatus::Done), Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_pages_through_the_sorted_tasks() {
        let h = harness();
        let mut created = Vec::new();
        for hour in [3, 1, 2, 4] {
            let task = h.service.create("paged", t0() + chrono::Duration::hours(hour)).await.unwrap();
            created.push((hour, task.id));
        }
        created.sort();

        let page: Vec<_> = h
            .service
            .list(None, Page::new(1, 2))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(page, vec![created[1].1, created[2].1]);

        assert!(h.service.list(None, Page::new(10, 5)).await.unwrap().is_empty());
        assert!(h.service.list(None, Page::new(0, 0)).await.unwrap().is_empty());
    }
}
