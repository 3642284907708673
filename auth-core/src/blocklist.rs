//! Revoked-token blocklist keyed by `jti`.
//!
//! Entries carry the token's remaining lifetime as their TTL, so the list
//! never outgrows the set of still-valid tokens. Already-expired tokens are
//! not stored at all.

use std::time::Duration;

use error_types::{codes, AuthError, AuthResult};

use crate::jwt::{self, Claims};
use crate::store::{self, SessionStore};
use crate::ttl;

pub const BLOCKLIST_KEY_PREFIX: &str = "jwt-block-list";

fn blocklist_key(jti: &str) -> String {
    store::namespaced(&format!("{BLOCKLIST_KEY_PREFIX}:{jti}"))
}

/// Record `token`'s jti until its natural expiry. Returns the decoded claims
/// so callers can inspect what was revoked.
pub async fn add(token: &str, store: &SessionStore) -> AuthResult<Claims> {
    let claims = jwt::decode(token)?.claims;
    let jti = claims.jti.clone().ok_or_else(|| {
        AuthError::forbidden(codes::INVALID_TOKEN, "Token carries no jti claim.")
    })?;

    let remaining = match claims.exp {
        Some(exp) => {
            let remaining = exp - ttl::unix_now();
            if remaining <= 0 {
                // Expired tokens are already unusable; nothing to record.
                return Ok(claims);
            }
            Some(remaining as u64)
        }
        None => None,
    };

    let key = blocklist_key(&jti);
    if let Some(redis) = store.redis() {
        match remaining {
            Some(ttl) => redis.set_ex(&key, "true", ttl).await,
            None => redis.set(&key, "true").await,
        }
        .map_err(store::storage_error)?;
    } else {
        let ttl = remaining.map(Duration::from_secs);
        store.local().set(&key, "true", ttl).await;
        if let Some(kv) = store.kv() {
            kv.set(&key, "true", ttl).await;
        }
    }

    tracing::info!(%jti, ttl = ?remaining, "token blocklisted");
    Ok(claims)
}

/// True when `jti` has been revoked. Without a distributed store the local
/// cache is consulted first and a durable-KV hit is backfilled into it.
pub async fn check(jti: &str, store: &SessionStore) -> AuthResult<bool> {
    let key = blocklist_key(jti);

    if let Some(redis) = store.redis() {
        return redis.exists(&key).await.map_err(store::storage_error);
    }

    if let Some(value) = store.local().get(&key).await {
        return Ok(is_truthy(&value));
    }

    if let Some(kv) = store.kv() {
        if let Some(value) = kv.get(&key).await {
            if is_truthy(&value) {
                store.local().set(&key, &value, None).await;
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "false" && value != "0"
}
