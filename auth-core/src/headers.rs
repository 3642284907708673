//! Response header and cookie formatting for sessions.
//!
//! The header names are the contract downstream clients depend on; cookie
//! lines always carry `Path=/; HttpOnly; SameSite=Strict` and a `Max-Age`
//! clamped at zero.

use crate::anonymous::{self, HeaderSource};
use crate::session::{SessionStatus, TokenKind};
use crate::ttl;

pub const HEADER_USER_ID: &str = "X-Znx-User-Id";
pub const HEADER_API_ID: &str = "X-Znx-Api-Id";
pub const HEADER_USER_SESSION_STATUS: &str = "X-Znx-User-Session-Status";
pub const HEADER_API_SESSION_STATUS: &str = "X-Znx-Api-Session-Status";
pub const HEADER_APP_TOKEN: &str = "X-Znx-App-Token";
pub const HEADER_COOKIES_ACCEPTED: &str = "X-Znx-Cookies-Accepted";
pub const HEADER_API_AUTHORIZATION: &str = "X-Znx-Authorization";

pub const HEADER_RATE_LIMIT_LIMIT: &str = "X-Znx-RateLimit-Limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "X-Znx-RateLimit-Remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "X-Znx-RateLimit-Reset";

/// Plain headers plus the ordered `Set-Cookie` lines for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHeaders {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionHeaderOptions<'a> {
    pub cookies_accepted: bool,
    pub status: SessionStatus,
    pub kind: TokenKind,
    pub subject: &'a str,
    /// Unix seconds; cookie `Max-Age` is `max(0, expiration - now)`.
    pub expiration: i64,
    pub refresh_token: Option<&'a str>,
}

impl<'a> SessionHeaderOptions<'a> {
    pub fn new(kind: TokenKind, subject: &'a str) -> Self {
        Self {
            cookies_accepted: false,
            status: SessionStatus::Unconfirmed,
            kind,
            subject,
            expiration: 0,
            refresh_token: None,
        }
    }
}

fn cookie_line(name: &str, value: &str, max_age: i64) -> String {
    format!("{name}={value}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Strict")
}

/// Serialize a session into its response headers and cookie lines.
pub fn session_headers(opts: &SessionHeaderOptions) -> SessionHeaders {
    let max_age = (opts.expiration - ttl::unix_now()).max(0);

    let mut headers = vec![
        (
            opts.kind.status_header().to_string(),
            opts.status.as_str().to_string(),
        ),
        (opts.kind.subject_header().to_string(), opts.subject.to_string()),
    ];
    if let (Some(header), Some(token)) = (opts.kind.token_header(), opts.refresh_token) {
        headers.push((header.to_string(), token.to_string()));
    }

    let mut cookies = Vec::new();
    if opts.cookies_accepted {
        cookies.push(cookie_line(
            opts.kind.status_header(),
            opts.status.as_str(),
            max_age,
        ));
        cookies.push(cookie_line(opts.kind.subject_header(), opts.subject, max_age));
        if let Some(token_header) = opts.kind.token_header() {
            match opts.refresh_token {
                Some(token) => cookies.push(cookie_line(token_header, token, max_age)),
                // Failed attempts clear any stored token cookie client-side.
                None if opts.status.is_failure() => {
                    cookies.push(cookie_line(token_header, "", 0))
                }
                None => {}
            }
        }
        cookies.push(cookie_line(HEADER_COOKIES_ACCEPTED, "true", max_age));
    }

    SessionHeaders { headers, cookies }
}

/// The client-declared subject: the cookie for the type's subject header,
/// falling back to the plain header of the same name.
pub fn client_subject(
    headers: &dyn HeaderSource,
    cookies: &dyn HeaderSource,
    kind: TokenKind,
) -> Option<String> {
    let key = kind.subject_header();
    cookies
        .get_header(key)
        .or_else(|| headers.get_header(key))
        .filter(|subject| !subject.is_empty())
}

/// True iff the client sent `X-Znx-Cookies-Accepted: true` as a header or
/// cookie.
pub fn cookies_accepted(headers: &dyn HeaderSource, cookies: &dyn HeaderSource) -> bool {
    cookies
        .get_header(HEADER_COOKIES_ACCEPTED)
        .or_else(|| headers.get_header(HEADER_COOKIES_ACCEPTED))
        .is_some_and(|value| value == "true")
}

/// Headers describing an attempt with no verified session: subject falls
/// back to the anonymous id and expiration to zero.
pub fn default_session_headers(
    headers: &dyn HeaderSource,
    cookies: &dyn HeaderSource,
    kind: TokenKind,
    status: SessionStatus,
) -> SessionHeaders {
    let subject = client_subject(headers, cookies, kind)
        .unwrap_or_else(|| anonymous::anonymous_id(headers));
    session_headers(&SessionHeaderOptions {
        cookies_accepted: cookies_accepted(headers, cookies),
        status,
        kind,
        subject: &subject,
        expiration: 0,
        refresh_token: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_headers_without_cookies() {
        let opts = SessionHeaderOptions {
            status: SessionStatus::Active,
            ..SessionHeaderOptions::new(TokenKind::User, "user-1")
        };
        let out = session_headers(&opts);
        assert!(out.cookies.is_empty());
        assert!(out
            .headers
            .contains(&(HEADER_USER_SESSION_STATUS.to_string(), "active".to_string())));
        assert!(out
            .headers
            .contains(&(HEADER_USER_ID.to_string(), "user-1".to_string())));
    }

    #[test]
    fn test_cookie_lines_for_user_session() {
        let exp = ttl::unix_now() + 600;
        let opts = SessionHeaderOptions {
            cookies_accepted: true,
            status: SessionStatus::Active,
            expiration: exp,
            refresh_token: Some("refresh-token"),
            ..SessionHeaderOptions::new(TokenKind::User, "user-1")
        };
        let out = session_headers(&opts);

        assert_eq!(out.cookies.len(), 4);
        assert!(out.cookies[0].starts_with("X-Znx-User-Session-Status=active; Max-Age="));
        assert!(out.cookies[1].starts_with("X-Znx-User-Id=user-1; Max-Age="));
        assert!(out.cookies[2].starts_with("X-Znx-App-Token=refresh-token; Max-Age="));
        assert!(out.cookies[3].starts_with("X-Znx-Cookies-Accepted=true; Max-Age="));
        for cookie in &out.cookies {
            assert!(cookie.ends_with("; Path=/; HttpOnly; SameSite=Strict"));
        }
    }

    #[test]
    fn test_failure_clears_token_cookie() {
        let opts = SessionHeaderOptions {
            cookies_accepted: true,
            status: SessionStatus::Failed,
            ..SessionHeaderOptions::new(TokenKind::User, "anonymous-abc")
        };
        let out = session_headers(&opts);

        assert!(out
            .cookies
            .iter()
            .any(|c| c.starts_with("X-Znx-App-Token=; Max-Age=0;")));
        // expired session: every Max-Age clamps to zero
        for cookie in &out.cookies {
            assert!(cookie.contains("Max-Age=0;"));
        }
    }

    #[test]
    fn test_api_sessions_have_no_token_cookie() {
        let opts = SessionHeaderOptions {
            cookies_accepted: true,
            status: SessionStatus::Active,
            refresh_token: Some("should-not-appear"),
            ..SessionHeaderOptions::new(TokenKind::Api, "svc-1")
        };
        let out = session_headers(&opts);
        assert!(out.cookies.iter().all(|c| !c.contains("X-Znx-App-Token")));
        assert!(out
            .headers
            .iter()
            .all(|(name, _)| name != HEADER_APP_TOKEN));
        assert!(out
            .headers
            .contains(&(HEADER_API_ID.to_string(), "svc-1".to_string())));
    }

    #[test]
    fn test_client_subject_prefers_cookie() {
        let headers = map(&[(HEADER_USER_ID, "from-header")]);
        let cookies = map(&[(HEADER_USER_ID, "from-cookie")]);
        assert_eq!(
            client_subject(&headers, &cookies, TokenKind::User).as_deref(),
            Some("from-cookie")
        );
        assert_eq!(
            client_subject(&headers, &map(&[]), TokenKind::User).as_deref(),
            Some("from-header")
        );
        assert_eq!(client_subject(&map(&[]), &map(&[]), TokenKind::User), None);
    }

    #[test]
    fn test_cookies_accepted_literal_true() {
        let yes = map(&[(HEADER_COOKIES_ACCEPTED, "true")]);
        let no = map(&[(HEADER_COOKIES_ACCEPTED, "TRUE")]);
        assert!(cookies_accepted(&yes, &map(&[])));
        assert!(cookies_accepted(&map(&[]), &yes));
        assert!(!cookies_accepted(&no, &map(&[])));
        assert!(!cookies_accepted(&map(&[]), &map(&[])));
    }

    #[test]
    fn test_default_headers_fall_back_to_anonymous() {
        let headers = map(&[("x-real-ip", "203.0.113.7")]);
        let out = default_session_headers(
            &headers,
            &map(&[]),
            TokenKind::User,
            SessionStatus::Failed,
        );
        let subject = out
            .headers
            .iter()
            .find(|(name, _)| name == HEADER_USER_ID)
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(subject.starts_with("anonymous-"));
        assert!(out.cookies.is_empty());
    }
}
