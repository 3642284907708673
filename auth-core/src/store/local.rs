use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-process cache with lazy TTL expiry and per-key mutual exclusion.
///
/// The per-key locks are what the local rate-limit path relies on for its
/// read-modify-write critical section.
#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, Entry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if entry.live() => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.entries.remove(key);
        }
        value
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    pub async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.clear();
    }

    /// Acquire the exclusive lock for `key`, creating it on first use.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let cell = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        cell.lock_owned().await
    }
}
