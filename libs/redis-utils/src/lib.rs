//! Redis plumbing shared by the auth storage tiers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, RedisError, Script};
use tokio::sync::Mutex;
use tracing::warn;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Open a connection manager for the given URI.
pub async fn connect(redis_uri: &str) -> Result<SharedConnectionManager> {
    let client = Client::open(redis_uri).context("failed to construct Redis client")?;
    let manager = ConnectionManager::new(client)
        .await
        .context("failed to initialize Redis connection manager")?;
    Ok(Arc::new(Mutex::new(manager)))
}

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);
// Floor keeps a misconfigured environment from failing every command
// instantly.
const OP_TIMEOUT_FLOOR_MS: u64 = 250;

fn op_timeout_from_env() -> Duration {
    std::env::var("REDIS_OP_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(|ms| Duration::from_millis(ms.max(OP_TIMEOUT_FLOOR_MS)))
        .unwrap_or(DEFAULT_OP_TIMEOUT)
}

/// Typed facade over the shared connection manager, covering the handful of
/// operations the auth storage tiers need: string reads/writes with TTL,
/// existence checks and atomic Lua script evaluation. Every round trip runs
/// under the store's operation deadline.
#[derive(Clone)]
pub struct RedisStore {
    manager: SharedConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// The deadline defaults from `REDIS_OP_TIMEOUT_MS` (milliseconds).
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self {
            manager,
            op_timeout: op_timeout_from_env(),
        }
    }

    pub async fn connect(redis_uri: &str) -> Result<Self> {
        Ok(Self::new(connect(redis_uri).await?))
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    /// Clone the managed connection out of the mutex; the manager itself
    /// multiplexes, so the clone is cheap and the guard is held only briefly.
    async fn connection(&self) -> ConnectionManager {
        self.manager.lock().await.clone()
    }

    async fn deadline<T, F>(&self, op: F) -> Result<T, RedisError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Redis round trip still pending after {:?}, abandoning it",
                    self.op_timeout
                );
                Err(RedisError::from((
                    redis::ErrorKind::IoError,
                    "redis operation deadline exceeded",
                )))
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.connection().await;
        self.deadline(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut conn = self.connection().await;
        self.deadline(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), RedisError> {
        let mut conn = self.connection().await;
        self.deadline(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.connection().await;
        self.deadline(redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn))
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, RedisError> {
        let mut conn = self.connection().await;
        self.deadline(redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await
    }

    /// Evaluate a Lua script server-side. The script runs atomically, which
    /// is what the rate limiter relies on for concurrent callers.
    pub async fn eval<T: FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T, RedisError> {
        let mut conn = self.connection().await;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }
        self.deadline(invocation.invoke_async(&mut conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timeout_parsing() {
        std::env::remove_var("REDIS_OP_TIMEOUT_MS");
        assert_eq!(op_timeout_from_env(), DEFAULT_OP_TIMEOUT);

        std::env::set_var("REDIS_OP_TIMEOUT_MS", "1500");
        assert_eq!(op_timeout_from_env(), Duration::from_millis(1_500));

        // values under the floor are bumped up
        std::env::set_var("REDIS_OP_TIMEOUT_MS", "10");
        assert_eq!(
            op_timeout_from_env(),
            Duration::from_millis(OP_TIMEOUT_FLOOR_MS)
        );

        std::env::set_var("REDIS_OP_TIMEOUT_MS", "not-a-number");
        assert_eq!(op_timeout_from_env(), DEFAULT_OP_TIMEOUT);

        std::env::remove_var("REDIS_OP_TIMEOUT_MS");
    }
}
