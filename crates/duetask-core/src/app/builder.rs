//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 方針
//! - Config・TaskStore・Clock を受け取り、各コンポーネントに注入する（グローバル状態なし）
//! - build() 時に config を検証し、store を開く（Fail-fast）
//! - プロセスの起動手順（serving / worker）は App のメソッドとして提供する

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{
    CatchUp, DelayScheduler, OutcomeSnapshot, ReconciliationSweep, StatusReport, StatusTransition,
    SweepLoop, TaskService, WorkerGroup, WorkerSettings,
};
use crate::config::{Config, ConfigError};
use crate::error::CoreError;
use crate::impls::{InMemoryDelayQueue, SqliteTaskStore};
use crate::ports::{
    Clock, DelayQueue, IdGenerator, StoreError, SystemClock, TaskStore, UlidGenerator,
};

/// `database.path` の値がこれなら in-memory の SQLite を開く
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .with_config(Config::load(None)?)
///     .build()?;
/// let booted = app.catch_up().catch_up_synchronously().await?;
/// ```
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open task store: {0}")]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            clock: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// 省略時は `config.database.path` の SQLite を開く
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 省略時は SystemClock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config)?,
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let queue: Arc<dyn DelayQueue> = Arc::new(InMemoryDelayQueue::with_max_wait(
            Arc::clone(&clock),
            self.config.max_wait(),
        ));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        let scheduler = DelayScheduler::new(Arc::clone(&queue));
        let transition = StatusTransition::new(Arc::clone(&store), Arc::clone(&clock));
        let time_limit = self.config.transition_timeout();
        let sweep = ReconciliationSweep::new(Arc::clone(&store), Arc::clone(&clock))
            .with_time_limit(time_limit);
        let catch_up = CatchUp::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            self.config.catch_up.max_passes,
        )
        .with_time_limit(time_limit);
        let tasks = TaskService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            ids,
            scheduler.clone(),
        );

        Ok(App {
            config: self.config,
            store,
            clock,
            queue,
            scheduler,
            transition,
            sweep,
            catch_up,
            tasks,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn TaskStore>, StoreError> {
    let path = &config.database.path;
    let store = if path.as_os_str() == IN_MEMORY_DATABASE {
        SqliteTaskStore::open_in_memory()?
    } else {
        SqliteTaskStore::open(path)?
    };
    tracing::debug!(path = %path.display(), "task store opened");
    Ok(Arc::new(store))
}

/// App はワイヤリング済みのコア
pub struct App {
    config: Config,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    queue: Arc<dyn DelayQueue>,
    scheduler: DelayScheduler,
    transition: StatusTransition,
    sweep: ReconciliationSweep,
    catch_up: CatchUp,
    tasks: TaskService,
}

impl App {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn transition(&self) -> &StatusTransition {
        &self.transition
    }

    pub fn scheduler(&self) -> &DelayScheduler {
        &self.scheduler
    }

    pub fn sweep(&self) -> &ReconciliationSweep {
        &self.sweep
    }

    pub fn catch_up(&self) -> &CatchUp {
        &self.catch_up
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub async fn status(&self) -> Result<StatusReport, StoreError> {
        StatusReport::collect(self.store.as_ref(), self.clock.as_ref()).await
    }

    /// Worker-process boot.
    ///
    /// 1. ready sweep（落ちていた間に期限を過ぎたタスクを回収）
    /// 2. まだ先のタスクをキューに積み直す
    /// 3. ワーカーと定期 sweep を起動
    ///
    /// sweep と priming の store エラーはログのみ。閉じたキューはエラー。
    pub async fn start_worker(&self) -> Result<WorkerHandle, CoreError> {
        match self.sweep.sweep().await {
            Ok(transitioned) => tracing::info!(transitioned, "worker ready sweep complete"),
            Err(err) => tracing::warn!(error = %err, "worker ready sweep failed"),
        }

        match self.scheduler.prime(self.store.as_ref(), self.clock.as_ref()).await {
            Ok(_) => {}
            Err(super::ScheduleError::Store(err)) => {
                tracing::warn!(error = %err, "priming failed, future tasks wait for the sweep");
            }
            Err(err) => return Err(err.into()),
        }

        let settings = WorkerSettings {
            concurrency: self.config.worker.concurrency,
            pop_timeout: self.config.pop_timeout(),
            transition_timeout: self.config.transition_timeout(),
            retry: self.config.retry_policy(),
        };
        let workers = WorkerGroup::spawn(
            Arc::clone(&self.queue),
            self.transition.clone(),
            Arc::clone(&self.clock),
            settings,
        );
        let sweep_loop = SweepLoop::new(self.sweep.clone(), self.config.sweep_interval())
            .spawn(workers.subscribe_shutdown());

        Ok(WorkerHandle {
            workers,
            sweep_loop,
            queue: Arc::clone(&self.queue),
        })
    }

    /// Serving-process boot: catch-up must finish before anything is served.
    pub async fn start_serving(&self) -> Result<(usize, WorkerHandle), CoreError> {
        let caught_up = self.catch_up.catch_up_synchronously().await?;
        let handle = self.start_worker().await?;
        Ok((caught_up, handle))
    }
}

/// Running worker machinery of one process.
pub struct WorkerHandle {
    workers: WorkerGroup,
    sweep_loop: JoinHandle<()>,
    queue: Arc<dyn DelayQueue>,
}

impl WorkerHandle {
    pub fn stats(&self) -> OutcomeSnapshot {
        self.workers.stats()
    }

    /// Stop workers and the sweep loop; pending in-memory jobs are dropped.
    pub async fn shutdown(self) -> OutcomeSnapshot {
        self.workers.request_shutdown();
        self.queue.close();
        if let Err(err) = self.sweep_loop.await {
            tracing::error!(error = %err, "sweep loop panicked");
        }
        let stats = self.workers.shutdown_and_join().await;
        tracing::info!(?stats, "worker machinery stopped");
        stats
    }
}
