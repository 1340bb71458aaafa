use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::StateStore;

/// In-memory state store for tests and callers that accept losing progress
/// on restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStateStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.put("k", json!({"done": true})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStateStore::new();
        store.put("k", json!(1)).await.unwrap();
        store.put("k", json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }
}
