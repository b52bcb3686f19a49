//! InMemoryTaskStore - テスト・開発用の正本
//!
//! # 実装詳細
//! - `tokio::sync::Mutex<HashMap<TaskId, Task>>` で排他制御
//! - ロックは各操作の中で取得し、await を跨がずに解放する

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{Task, TaskId, TaskStatus};
use crate::ports::{StoreError, TaskFilter, TaskPatch, TaskStore};

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records.
    pub async fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.tasks.lock().await;
            for task in tasks {
                guard.insert(task.id, task);
            }
        }
        store
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn load(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<bool, StoreError> {
        let mut guard = self.tasks.lock().await;
        let Some(task) = guard.get_mut(&id) else {
            return Ok(false);
        };
        task.status = status;
        Ok(true)
    }

    async fn patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        let mut guard = self.tasks.lock().await;
        let Some(task) = guard.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply_to(task);
        Ok(Some(task.clone()))
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.tasks.lock().await.remove(&id).is_some())
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let guard = self.tasks.lock().await;
        Ok(guard.values().filter(|t| filter.matches(t)).cloned().collect())
    }
}
