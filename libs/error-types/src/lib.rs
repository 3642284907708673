//! Unified error types for the zanix auth workspace
//!
//! Errors are carried as a (kind, code, cause, meta) record so that guards can
//! map them onto HTTP responses without losing the machine-readable code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable error codes attached to [`AuthError`].
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const INVALID_TOKEN_SIGNATURE: &str = "INVALID_TOKEN_SIGNATURE";
    pub const EXPIRED_TOKEN: &str = "EXPIRED_TOKEN";
    pub const INVALID_TOKEN_ISSUER: &str = "INVALID_TOKEN_ISSUER";
    pub const INVALID_TOKEN_PERMISSIONS: &str = "INVALID_TOKEN_PERMISSIONS";
    pub const INVALID_TOKEN_SUBJECT: &str = "INVALID_TOKEN_SUBJECT";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const TOO_MANY_REQUESTS: &str = "TOO_MANY_REQUESTS";
    pub const OTP_MISMATCH: &str = "OTP_MISMATCH";
    pub const MISSING_KEY: &str = "MISSING_KEY";
    pub const SIGNING_ERROR: &str = "SIGNING_ERROR";
    pub const INVALID_EXPIRATION: &str = "INVALID_EXPIRATION";
    pub const OAUTH_ERROR: &str = "OAUTH_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

/// Human-readable causes that downstream clients match on.
pub mod messages {
    pub const MISSING_BEARER: &str = "Authorization token is missing or invalid.";
    pub const MISSING_REFRESH: &str = "Refresh token is missing or invalid.";
    pub const TOKEN_BLOCKLISTED: &str =
        "The provided token has been revoked or is blocklisted.";
    pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded for the current window.";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    Unauthorized,
    Forbidden,
    TooManyRequests,
    InternalServerError,
}

impl AuthErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            AuthErrorKind::Unauthorized => 401,
            AuthErrorKind::Forbidden => 403,
            AuthErrorKind::TooManyRequests => 429,
            AuthErrorKind::InternalServerError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::Unauthorized => "Unauthorized",
            AuthErrorKind::Forbidden => "Forbidden",
            AuthErrorKind::TooManyRequests => "TooManyRequests",
            AuthErrorKind::InternalServerError => "InternalServerError",
        }
    }
}

/// Standard error response body produced by the guard layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub timestamp: String,
}

#[derive(Debug, Error)]
#[error("{cause}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub code: &'static str,
    pub cause: String,
    pub meta: Option<Value>,
    pub retry_after: Option<u64>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, code: &'static str, cause: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            cause: cause.into(),
            meta: None,
            retry_after: None,
        }
    }

    pub fn unauthorized(code: &'static str, cause: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unauthorized, code, cause)
    }

    pub fn forbidden(code: &'static str, cause: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Forbidden, code, cause)
    }

    pub fn internal(code: &'static str, cause: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::InternalServerError, code, cause)
    }

    /// Forbidden specialization raised by the codec and the blocklist check;
    /// guards use it to trigger the failure-header path.
    pub fn permission_denied(cause: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Forbidden, codes::PERMISSION_DENIED, cause)
    }

    pub fn too_many_requests(cause: impl Into<String>, retry_after: u64) -> Self {
        Self::new(AuthErrorKind::TooManyRequests, codes::TOO_MANY_REQUESTS, cause)
            .with_retry_after(retry_after)
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == codes::PERMISSION_DENIED
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.kind.as_str().to_string(),
            message: self.cause.clone(),
            status: self.status_code(),
            code: self.code.to_string(),
            meta: self.meta.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
