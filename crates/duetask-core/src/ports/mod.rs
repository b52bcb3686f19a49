//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite, タイマー, 時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - DelayQueue は配送の遅延だけを担う（task_id と fire_at のみ）
//! - 時刻は必ず Clock から取る

pub mod clock;
pub mod delay_queue;
pub mod id_generator;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{AnchoredClock, Clock, FixedClock, SystemClock};
pub use self::delay_queue::{DelayQueue, QueueError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{StoreError, TaskFilter, TaskPatch, TaskStore};
