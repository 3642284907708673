//! Fixed-window rate limiting with failed-attempt accounting.
//!
//! Two implementations share one observable contract: against Redis a single
//! server-side Lua script performs the read-modify-write atomically; against
//! the in-process cache the same logic runs inside the per-key lock. The
//! companion failed-attempts counter outlives the window so guards can spot
//! repeat offenders.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;
use redis::Script;
use serde::{Deserialize, Serialize};

use error_types::AuthResult;

use crate::store::{self, LocalCache, SessionStore};
use crate::{config, ttl};

pub const RATE_LIMIT_KEY_PREFIX: &str = "rate-limit";
pub const FAILED_ATTEMPTS_SUFFIX: &str = "failed-attempts";
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;
pub const DEFAULT_SESSION_RATE_LIMIT: u32 = 100;

// The failed-attempts counter must survive several windows to be useful.
const FAILED_ATTEMPTS_TTL_FACTOR: u64 = 10;

/// Per-key window record as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowRecord {
    count: u32,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub count: u32,
    /// Window start, unix seconds.
    pub created_at: i64,
    pub failed_attempts: u32,
    pub can_continue: bool,
}

impl RateLimitOutcome {
    /// Seconds until the current window expires.
    pub fn retry_after(&self, window_seconds: u64) -> u64 {
        (self.created_at + window_seconds as i64 - ttl::unix_now()).max(0) as u64
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub key: String,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub max_failed_attempts: u32,
}

impl RateLimitConfig {
    pub fn new(session_id: &str, max_requests: u32) -> Self {
        Self {
            key: store::namespaced(&format!("{RATE_LIMIT_KEY_PREFIX}:{session_id}")),
            max_requests,
            window_seconds: config::rate_limit_window_seconds(),
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
        }
    }

    fn failed_attempts_key(&self) -> String {
        format!("{}:{FAILED_ATTEMPTS_SUFFIX}", self.key)
    }
}

/// Count one request against `spec.key`.
pub async fn check(store: &SessionStore, spec: &RateLimitConfig) -> AuthResult<RateLimitOutcome> {
    match store.redis() {
        Some(redis) => check_distributed(redis, spec).await,
        None => check_local(store.local(), spec).await,
    }
}

// Single atomic round trip: load the record, apply the window logic, write
// back. Mutual exclusion under concurrent callers comes from Redis executing
// scripts serially.
static WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local counter = KEYS[1]
        local failures = KEYS[2]
        local max_requests = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local max_failed = tonumber(ARGV[3])
        local now = tonumber(ARGV[4])
        local failures_ttl = tonumber(ARGV[5])

        local record = redis.call('HMGET', counter, 'count', 'createdAt')
        local count = tonumber(record[1])
        local created = tonumber(record[2])

        if not count then
            redis.call('HMSET', counter, 'count', 1, 'createdAt', now)
            redis.call('EXPIRE', counter, window)
            redis.call('SET', failures, 0, 'EX', failures_ttl)
            return {1, now, 0, 1}
        end

        count = count + 1
        redis.call('HSET', counter, 'count', count)

        if count <= max_requests then
            local failed = tonumber(redis.call('GET', failures)) or 0
            return {count, created, failed, 1}
        end

        local failed = redis.call('INCR', failures)
        redis.call('EXPIRE', failures, failures_ttl)
        if failed >= max_failed then
            redis.call('DEL', failures)
        end
        return {count, created, failed, 0}
        "#,
    )
});

async fn check_distributed(
    redis: &redis_utils::RedisStore,
    spec: &RateLimitConfig,
) -> AuthResult<RateLimitOutcome> {
    let failures_key = spec.failed_attempts_key();
    let args = vec![
        spec.max_requests.to_string(),
        spec.window_seconds.to_string(),
        spec.max_failed_attempts.to_string(),
        ttl::unix_now().to_string(),
        (spec.window_seconds * FAILED_ATTEMPTS_TTL_FACTOR).to_string(),
    ];
    let reply: Vec<i64> = redis
        .eval(
            &WINDOW_SCRIPT,
            &[spec.key.as_str(), failures_key.as_str()],
            &args,
        )
        .await
        .map_err(store::storage_error)?;

    if reply.len() != 4 {
        return Err(store::storage_error("unexpected rate-limit script reply"));
    }
    Ok(RateLimitOutcome {
        count: reply[0] as u32,
        created_at: reply[1],
        failed_attempts: reply[2] as u32,
        can_continue: reply[3] == 1,
    })
}

// Same logic as the script, under the cache's per-key lock so concurrent
// callers never observe the same pre-increment count.
async fn check_local(cache: &LocalCache, spec: &RateLimitConfig) -> AuthResult<RateLimitOutcome> {
    let _guard = cache.lock(&spec.key).await;
    let now = ttl::unix_now();
    let failures_key = spec.failed_attempts_key();
    let failures_ttl = Duration::from_secs(spec.window_seconds * FAILED_ATTEMPTS_TTL_FACTOR);

    let existing = cache
        .get(&spec.key)
        .await
        .and_then(|raw| serde_json::from_str::<WindowRecord>(&raw).ok());

    let mut record = match existing {
        None => {
            let record = WindowRecord {
                count: 1,
                created_at: now,
            };
            cache
                .set(
                    &spec.key,
                    &serde_json::to_string(&record).map_err(store::storage_error)?,
                    Some(Duration::from_secs(spec.window_seconds)),
                )
                .await;
            cache.set(&failures_key, "0", Some(failures_ttl)).await;
            return Ok(RateLimitOutcome {
                count: 1,
                created_at: now,
                failed_attempts: 0,
                can_continue: true,
            });
        }
        Some(record) => record,
    };

    record.count += 1;
    // write back under the original window, not a fresh one
    let remaining = (record.created_at + spec.window_seconds as i64 - now).max(1) as u64;
    cache
        .set(
            &spec.key,
            &serde_json::to_string(&record).map_err(store::storage_error)?,
            Some(Duration::from_secs(remaining)),
        )
        .await;

    let prior_failures: u32 = cache
        .get(&failures_key)
        .await
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);

    if record.count <= spec.max_requests {
        return Ok(RateLimitOutcome {
            count: record.count,
            created_at: record.created_at,
            failed_attempts: prior_failures,
            can_continue: true,
        });
    }

    let failures = prior_failures + 1;
    if failures >= spec.max_failed_attempts {
        // cleared so the next denial starts a fresh escalation cycle
        cache.delete(&failures_key).await;
    } else {
        cache
            .set(&failures_key, &failures.to_string(), Some(failures_ttl))
            .await;
    }

    Ok(RateLimitOutcome {
        count: record.count,
        created_at: record.created_at,
        failed_attempts: failures,
        can_continue: false,
    })
}

// ---------------------------------------------------------------------------
// Plan table
// ---------------------------------------------------------------------------

static PLANS: Lazy<RwLock<Option<HashMap<u32, u32>>>> = Lazy::new(|| RwLock::new(None));

/// Drops the cached plan table; tests call this after mutating the env.
pub fn clear_plans() {
    *PLANS.write().expect("plan table poisoned") = None;
}

fn plan_table() -> HashMap<u32, u32> {
    if let Some(table) = PLANS.read().expect("plan table poisoned").as_ref() {
        return table.clone();
    }
    let parsed = parse_plans(
        std::env::var("RATE_LIMIT_PLANS")
            .ok()
            .as_deref()
            .unwrap_or(""),
    );
    let mut cached = PLANS.write().expect("plan table poisoned");
    cached.get_or_insert(parsed).clone()
}

fn parse_plans(raw: &str) -> HashMap<u32, u32> {
    let mut table = HashMap::new();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once(':') {
            Some((idx, max)) => match (idx.trim().parse(), max.trim().parse()) {
                (Ok(idx), Ok(max)) => {
                    table.insert(idx, max);
                }
                _ => tracing::warn!(%pair, "ignoring malformed rate-limit plan entry"),
            },
            None => tracing::warn!(%pair, "ignoring malformed rate-limit plan entry"),
        }
    }
    table
}

/// Resolve a session's `rateLimit` claim into a per-window quota: a plan
/// index when a table is configured, the raw value otherwise.
pub fn plan_lookup(session_rate_limit: u32) -> u32 {
    plan_table()
        .get(&session_rate_limit)
        .copied()
        .unwrap_or(session_rate_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn spec(key: &str, max_requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            key: key.to_string(),
            max_requests,
            window_seconds: 60,
            max_failed_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_window_crossing() {
        let store = SessionStore::new();
        let spec = spec("zanix:rate-limit:t1", 2);

        let first = check(&store, &spec).await.unwrap();
        assert!(first.can_continue);
        assert_eq!(first.count, 1);

        let second = check(&store, &spec).await.unwrap();
        assert!(second.can_continue);
        assert_eq!(second.count, 2);
        assert_eq!(second.created_at, first.created_at);

        let third = check(&store, &spec).await.unwrap();
        assert!(!third.can_continue);
        assert_eq!(third.count, 3);
        assert_eq!(third.failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_window_reset_via_ttl() {
        let store = SessionStore::new();
        let mut spec = spec("zanix:rate-limit:t2", 1);
        spec.window_seconds = 1;

        assert!(check(&store, &spec).await.unwrap().can_continue);
        assert!(!check(&store, &spec).await.unwrap().can_continue);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let fresh = check(&store, &spec).await.unwrap();
        assert!(fresh.can_continue);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn test_failed_attempts_cleared_at_max() {
        let store = SessionStore::new();
        let spec = spec("zanix:rate-limit:t3", 0);

        // max_requests=0: every request after the first denies
        assert!(check(&store, &spec).await.unwrap().can_continue);
        assert_eq!(check(&store, &spec).await.unwrap().failed_attempts, 1);
        assert_eq!(check(&store, &spec).await.unwrap().failed_attempts, 2);
        // reaches max_failed_attempts=3 and is cleared
        assert_eq!(check(&store, &spec).await.unwrap().failed_attempts, 3);
        // next cycle restarts from 1
        assert_eq!(check(&store, &spec).await.unwrap().failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_counts_are_distinct() {
        let store = std::sync::Arc::new(SessionStore::new());
        let spec = spec("zanix:rate-limit:t4", 100);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                check(&store, &spec).await.unwrap().count
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn test_parse_plans() {
        let table = parse_plans("0:50;1:500; 2:5000 ;bad;9:");
        assert_eq!(table.get(&0), Some(&50));
        assert_eq!(table.get(&1), Some(&500));
        assert_eq!(table.get(&2), Some(&5000));
        assert_eq!(table.len(), 3);
    }

    #[test]
    #[serial]
    fn test_plan_lookup_fallback() {
        std::env::remove_var("RATE_LIMIT_PLANS");
        clear_plans();
        assert_eq!(plan_lookup(250), 250);

        std::env::set_var("RATE_LIMIT_PLANS", "1:1000;2:10000");
        clear_plans();
        assert_eq!(plan_lookup(1), 1000);
        assert_eq!(plan_lookup(2), 10000);
        // index missing from the table falls back to the raw value
        assert_eq!(plan_lookup(7), 7);

        std::env::remove_var("RATE_LIMIT_PLANS");
        clear_plans();
    }

    #[test]
    fn test_retry_after() {
        let outcome = RateLimitOutcome {
            count: 5,
            created_at: ttl::unix_now() - 10,
            failed_attempts: 0,
            can_continue: false,
        };
        let retry = outcome.retry_after(60);
        assert!(retry <= 50 && retry >= 48);
    }
}
