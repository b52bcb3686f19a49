//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteTaskStore**: 本番用の正本（ファイル / in-memory）
//! - **InMemoryTaskStore**: テスト・開発用の正本
//! - **InMemoryDelayQueue**: プロセス内の遅延キュー

pub mod inmem_delay;
pub mod inmem_store;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_delay::InMemoryDelayQueue;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
