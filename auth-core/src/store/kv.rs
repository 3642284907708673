use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Durable key-value collaborator mirrored behind the local cache.
///
/// Implementations are provided by the host (a database table, an embedded
/// store); the library only consumes this narrow surface.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);
    async fn delete(&self, key: &str);
    async fn clear(&self);
}

/// In-memory [`KeyValueStore`] used by tests and single-process hosts.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, (String, Option<Instant>)>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Option<String> {
        let (value, expired) = match self.entries.get(key) {
            Some(entry) => match entry.1 {
                Some(at) if Instant::now() >= at => (None, true),
                _ => (Some(entry.0.clone()), false),
            },
            None => (None, false),
        };
        if expired {
            self.entries.remove(key);
        }
        value
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            (value.to_string(), ttl.map(|ttl| Instant::now() + ttl)),
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_round_trip() {
        let kv = MemoryKv::new();
        kv.set("k", "v", None).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("v"));
        kv.delete("k").await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_kv_ttl() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(20))).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await, None);
    }
}
