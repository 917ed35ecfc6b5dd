use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Durable key/value collaborator used for snapshots and recovery state.
/// A Redis-backed implementation lives outside the core; `MemoryKvStore`
/// below covers tests and single-process deployments.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    async fn keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
    async fn ping(&self) -> anyhow::Result<()>;
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|stored| !stored.expired())
            .map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|_, stored| !stored.expired());
        entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys = entries
            .iter()
            .filter(|(key, stored)| key.starts_with(prefix) && !stored.expired())
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = MemoryKvStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let store = MemoryKvStore::new();
        store
            .set("gone", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert!(store.keys("go").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix_and_sorts() {
        let store = MemoryKvStore::new();
        for key in ["agent_state:b", "agent_state:a", "system:x"] {
            store.set(key, "v".to_string(), None).await.unwrap();
        }
        let keys = store.keys("agent_state:").await.unwrap();
        assert_eq!(keys, vec!["agent_state:a", "agent_state:b"]);
    }
}
