//! duetask-core
//!
//! Core of the due-date task tracker: a PENDING task becomes DONE once its due
//! date passes, whatever happens to the scheduled job meant to do it.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, due_date, state, outcome, job, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, DelayQueue, Clock, IdGenerator）
//! - **app**: コアの操作（transition, scheduler, sweep, catch_up, worker_loop, builder など）
//! - **impls**: 実装（SqliteTaskStore, InMemoryTaskStore, InMemoryDelayQueue）
//! - **config**: 型付き設定（TOML + 環境変数）
//! - **error**: CoreError（境界ごとのエラーの集約）
//!
//! # 正しさの根拠
//! - transition() は冪等。重複・遅延・早すぎる配送はすべて no-op
//! - 状態はすべて TaskStore が持つ。キューの中身は失っても sweep が再導出する

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use crate::app::{App, AppBuilder};
pub use crate::config::Config;
pub use crate::domain::{DueDate, Task, TaskId, TaskStatus, TransitionOutcome};
pub use crate::error::CoreError;
