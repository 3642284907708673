//! Adapters between Actix request types and the framework-free core.

use std::collections::HashMap;

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, SET_COOKIE};
use actix_web::http::StatusCode;
use actix_web::{HttpMessage, HttpRequest, HttpResponse};

use auth_core::anonymous::HeaderSource;
use auth_core::headers::{
    SessionHeaders, HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
};
use auth_core::rate_limit::RateLimitOutcome;
use error_types::AuthError;

pub(crate) struct RequestHeaders<'a>(pub &'a HeaderMap);

impl HeaderSource for RequestHeaders<'_> {
    fn get_header(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

pub(crate) fn cookie_map(req: &HttpRequest) -> HashMap<String, String> {
    req.cookies()
        .map(|cookies| {
            cookies
                .iter()
                .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Counters surfaced as `X-Znx-RateLimit-*` headers.
pub(crate) struct RateMeta {
    pub outcome: RateLimitOutcome,
    pub max_requests: u32,
    pub window_seconds: u64,
}

pub(crate) fn append_rate_limit_headers(headers: &mut HeaderMap, meta: &RateMeta) {
    let reset = meta.outcome.created_at + meta.window_seconds as i64;
    let remaining = meta.max_requests.saturating_sub(meta.outcome.count);
    for (name, value) in [
        (HEADER_RATE_LIMIT_LIMIT, meta.max_requests.to_string()),
        (HEADER_RATE_LIMIT_REMAINING, remaining.to_string()),
        (HEADER_RATE_LIMIT_RESET, reset.to_string()),
    ] {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
}

pub(crate) fn append_session_headers(headers: &mut HeaderMap, session: &SessionHeaders) {
    for (name, value) in &session.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
    for cookie in &session.cookies {
        if let Ok(value) = HeaderValue::try_from(cookie.as_str()) {
            headers.append(SET_COOKIE, value);
        }
    }
}

/// An error response decorated with the session headers describing the
/// failed attempt.
pub(crate) fn failure_response(error: &AuthError, session: &SessionHeaders) -> HttpResponse {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    if let Some(seconds) = error.retry_after {
        builder.insert_header((RETRY_AFTER, seconds.to_string()));
    }
    let mut response = builder.json(error.to_response());
    append_session_headers(response.headers_mut(), session);
    response
}
