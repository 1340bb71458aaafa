pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

/// Durable keyed progress state, scoped by task execution identity.
///
/// The runner records completion markers and resume data here; correctness
/// after a crash depends entirely on this store surviving process restarts.
/// There is no ambient instance; a store is passed by reference through the
/// call chain.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()>;
}
