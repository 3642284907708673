//! Environment-backed signing/verification key registry.
//!
//! Each key space has a base unversioned name (`JWT_KEY`) and an enumerated
//! sequence `JWT_KEY_V1`, `JWT_KEY_V2`, … scanned contiguously until the
//! first gap. The active entry is a pure function of wall-clock time and the
//! rotation cycle, so every process agrees on the selection without
//! coordination.

use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use error_types::{codes, AuthError, AuthResult};

use crate::ttl;

/// HMAC secrets for `user` tokens.
pub const HMAC_KEY_PREFIX: &str = "JWT_KEY";
/// Base64 RSA private keys for `api` signing.
pub const RSA_PRIVATE_KEY_PREFIX: &str = "JWK_PRI";
/// Base64 RSA public keys for `api` verification.
pub const RSA_PUBLIC_KEY_PREFIX: &str = "JWK_PUB";

pub const ROTATION_CYCLE_ENV: &str = "JWK_ROTATION_CYCLE";
const DEFAULT_ROTATION_CYCLE_SECS: i64 = 30 * 24 * 3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub value: String,
    /// `V<n>` for versioned entries; `None` for the base unversioned key.
    pub version: Option<String>,
}

static REGISTRY: Lazy<RwLock<HashMap<String, Vec<KeyEntry>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Drops cached key material so tests can repopulate from a fresh
/// environment.
pub fn clear() {
    REGISTRY.write().expect("key registry poisoned").clear();
}

fn load_entries(prefix: &str) -> Vec<KeyEntry> {
    let mut entries = Vec::new();
    for n in 1.. {
        match env::var(format!("{prefix}_V{n}")) {
            Ok(value) => entries.push(KeyEntry {
                value,
                version: Some(format!("V{n}")),
            }),
            Err(_) => break,
        }
    }
    entries
}

fn entries_for(prefix: &str) -> Vec<KeyEntry> {
    if let Some(cached) = REGISTRY
        .read()
        .expect("key registry poisoned")
        .get(prefix)
    {
        return cached.clone();
    }
    // Concurrent first reads may both scan the environment; they converge on
    // the same entries, so last-write-wins is harmless.
    let loaded = load_entries(prefix);
    let mut registry = REGISTRY.write().expect("key registry poisoned");
    registry
        .entry(prefix.to_string())
        .or_insert(loaded)
        .clone()
}

/// Seconds per rotation step; `0` disables rotation.
pub fn rotation_cycle() -> i64 {
    match env::var(ROTATION_CYCLE_ENV) {
        Ok(raw) => ttl::parse_ttl(&raw).unwrap_or(DEFAULT_ROTATION_CYCLE_SECS),
        Err(_) => DEFAULT_ROTATION_CYCLE_SECS,
    }
}

/// `floor(now / cycle) mod count`; index 0 when rotation is disabled.
pub fn active_index(now_secs: i64, cycle_secs: i64, count: usize) -> usize {
    if cycle_secs <= 0 || count == 0 {
        return 0;
    }
    (now_secs / cycle_secs).rem_euclid(count as i64) as usize
}

/// Resolve the currently active key for a prefix. Falls back to the base
/// unversioned value when no versioned keys exist.
pub fn active_key(prefix: &str) -> AuthResult<KeyEntry> {
    let entries = entries_for(prefix);
    if entries.is_empty() {
        let value = env::var(prefix).map_err(|_| missing_key(prefix))?;
        return Ok(KeyEntry {
            value,
            version: None,
        });
    }
    let idx = active_index(ttl::unix_now(), rotation_cycle(), entries.len());
    Ok(entries[idx].clone())
}

/// Resolve `<prefix>_<kid>` when a key id is present, else the base value.
/// Used on verification, where the token header names the key that signed it.
pub fn key_by_kid(prefix: &str, kid: Option<&str>) -> AuthResult<String> {
    match kid {
        Some(kid) => {
            if let Some(entry) = entries_for(prefix)
                .iter()
                .find(|entry| entry.version.as_deref() == Some(kid))
            {
                return Ok(entry.value.clone());
            }
            let name = format!("{prefix}_{kid}");
            env::var(&name).map_err(|_| missing_key(&name))
        }
        None => env::var(prefix).map_err(|_| missing_key(prefix)),
    }
}

fn missing_key(name: &str) -> AuthError {
    AuthError::internal(
        codes::MISSING_KEY,
        format!("Signing key `{name}` is not configured."),
    )
}
