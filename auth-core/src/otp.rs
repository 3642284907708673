//! One-time passwords: N-digit codes bound to a target with a TTL.
//!
//! Single use is enforced by deleting the stored code on a successful
//! verification, so a concurrent second verification observes a miss.

use std::time::Duration;

use rand::RngCore;

use error_types::{codes, AuthError, AuthResult};

use crate::store::{self, SessionStore};

pub const OTP_KEY_PREFIX: &str = "otp";
pub const DEFAULT_OTP_TTL_SECS: u64 = 300;
pub const DEFAULT_OTP_LENGTH: usize = 6;

#[derive(Debug, Clone)]
pub struct OtpOptions {
    pub target: String,
    /// TTL in seconds; defaults to 300.
    pub exp: Option<u64>,
    /// Number of digits; defaults to 6.
    pub length: Option<usize>,
}

impl OtpOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            exp: None,
            length: None,
        }
    }
}

fn otp_key(target: &str) -> String {
    store::namespaced(&format!("{OTP_KEY_PREFIX}:{target}"))
}

/// Generate a code for `opts.target` and store it with the configured TTL.
///
/// Digits are drawn from crypto-random bytes reduced mod 10; the slight bias
/// is accepted for codes of this length.
pub async fn generate(opts: &OtpOptions, store: &SessionStore) -> AuthResult<String> {
    let length = opts.length.unwrap_or(DEFAULT_OTP_LENGTH);
    let ttl = opts.exp.unwrap_or(DEFAULT_OTP_TTL_SECS);

    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    let code: String = bytes
        .iter()
        .map(|byte| char::from(b'0' + byte % 10))
        .collect();

    let key = otp_key(&opts.target);
    if let Some(redis) = store.redis() {
        redis
            .set_ex(&key, &code, ttl)
            .await
            .map_err(store::storage_error)?;
    } else {
        store
            .local()
            .set(&key, &code, Some(Duration::from_secs(ttl)))
            .await;
    }

    tracing::debug!(target = %opts.target, ttl, "OTP generated");
    Ok(code)
}

/// Compare `code` against the stored value; delete it from every tier on
/// success. Empty codes never match.
pub async fn verify(target: &str, code: &str, store: &SessionStore) -> AuthResult<bool> {
    if code.is_empty() {
        return Ok(false);
    }

    let key = otp_key(target);
    let stored = match store.redis() {
        Some(redis) => redis.get(&key).await.map_err(store::storage_error)?,
        None => store.local().get(&key).await,
    };

    let matched = stored.as_deref() == Some(code);
    if matched {
        if let Some(redis) = store.redis() {
            redis.delete(&key).await.map_err(store::storage_error)?;
        }
        store.local().delete(&key).await;
        if let Some(kv) = store.kv() {
            kv.delete(&key).await;
        }
    }
    Ok(matched)
}

/// [`verify`] for flows that treat a mismatch as a denial rather than a
/// boolean: wrong, expired or already-used codes become a FORBIDDEN error.
pub async fn validate(target: &str, code: &str, store: &SessionStore) -> AuthResult<()> {
    if verify(target, code, store).await? {
        Ok(())
    } else {
        Err(AuthError::forbidden(
            codes::OTP_MISMATCH,
            "The provided one-time password is invalid or has expired.",
        ))
    }
}
