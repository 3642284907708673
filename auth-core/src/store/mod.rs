//! Storage tiers backing the blocklist, rate limiter and OTP engine.
//!
//! Selection rule: when a distributed store (Redis) is configured it is used
//! exclusively; otherwise operations run against the in-process cache, with
//! an optional durable key-value store mirroring the blocklist.

mod kv;
mod local;

pub use kv::{KeyValueStore, MemoryKv};
pub use local::LocalCache;

use std::sync::Arc;

use error_types::{codes, AuthError, AuthResult};
use redis_utils::RedisStore;

/// Prefix applied to every cache key the library owns.
pub const NAMESPACE: &str = "zanix";

pub fn namespaced(key: &str) -> String {
    format!("{NAMESPACE}:{key}")
}

#[derive(Clone, Default)]
pub struct SessionStore {
    local: Arc<LocalCache>,
    redis: Option<RedisStore>,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl SessionStore {
    /// In-process only; the configuration used by single-node deployments
    /// and by most tests.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redis(mut self, redis: RedisStore) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn with_kv(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Connects the distributed tier when `REDIS_URI` is set.
    pub async fn from_env() -> AuthResult<Self> {
        let mut store = Self::new();
        if let Ok(uri) = std::env::var("REDIS_URI") {
            let redis = RedisStore::connect(&uri).await.map_err(|err| {
                AuthError::internal(codes::STORAGE_ERROR, format!("Redis connect failed: {err}"))
            })?;
            store = store.with_redis(redis);
        }
        Ok(store)
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn redis(&self) -> Option<&RedisStore> {
        self.redis.as_ref()
    }

    pub fn kv(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.kv.as_ref()
    }
}

pub(crate) fn storage_error(err: impl std::fmt::Display) -> AuthError {
    AuthError::internal(codes::STORAGE_ERROR, format!("Storage operation failed: {err}"))
}
