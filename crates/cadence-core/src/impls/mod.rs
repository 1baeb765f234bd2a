//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryFailureStore / MemoryLock**: プロセス内（開発・テスト・単一プロセス運用）
//! - **SqliteFailureStore / SqliteLock**: 同じ DB ファイルを共有する複数プロセス向け

pub mod memory_lock;
pub mod memory_store;
pub mod sqlite;
pub mod sqlite_lock;
pub mod sqlite_store;

pub use self::memory_lock::MemoryLock;
pub use self::memory_store::MemoryFailureStore;
pub use self::sqlite::{SharedConnection, open_database};
pub use self::sqlite_lock::SqliteLock;
pub use self::sqlite_store::SqliteFailureStore;
