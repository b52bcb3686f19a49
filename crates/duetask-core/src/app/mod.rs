//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてコアの操作を実装します。
//!
//! # 主要コンポーネント
//! - **StatusTransition**: PENDING → DONE の冪等な遷移
//! - **DelayScheduler**: transition を due date に予約（schedule / reschedule / prime）
//! - **ReconciliationSweep**: overdue を正本から再導出して遷移
//! - **CatchUp**: serving プロセス起動前の同期的な追いつき
//! - **WorkerGroup / SweepLoop**: worker プロセスの常駐ループ
//! - **TaskService**: CRUD 側の協調者（作成・更新時に予約）
//! - **AppBuilder**: 構築とワイヤリング

pub mod builder;
pub mod catch_up;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod sweep;
pub mod sweep_loop;
pub mod tasks;
pub mod transition;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError, IN_MEMORY_DATABASE, WorkerHandle};
pub use self::catch_up::{CatchUp, CatchUpError};
pub use self::retry::RetryPolicy;
pub use self::scheduler::{DelayScheduler, ScheduleError};
pub use self::status::StatusReport;
pub use self::sweep::{ReconciliationSweep, SweepReport};
pub use self::sweep_loop::SweepLoop;
pub use self::tasks::{DEFAULT_PAGE_LIMIT, Page, TaskService, TaskUpdate};
pub use self::transition::StatusTransition;
pub use self::worker_loop::{OutcomeCounts, OutcomeSnapshot, WorkerGroup, WorkerSettings};
