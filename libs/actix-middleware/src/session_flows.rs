//! Request-context wrappers around the core session flows.
//!
//! Handlers call these instead of the core functions directly: the refresh
//! token falls back to the `X-Znx-App-Token` cookie, and the resulting
//! session is attached to the request so the response interceptor can
//! serialize it.

use actix_web::{HttpMessage, HttpRequest};

use auth_core::headers::HEADER_APP_TOKEN;
use auth_core::session::{self, AppTokenOptions, RefreshedTokens, Session, SessionTokens, TokenKind};
use auth_core::store::SessionStore;
use error_types::AuthResult;

fn cookie_token(req: &HttpRequest) -> Option<String> {
    req.cookie(HEADER_APP_TOKEN)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Mint an access/refresh pair and attach the resulting session to the
/// request.
pub fn issue_session_tokens(
    req: &HttpRequest,
    opts: &AppTokenOptions,
) -> AuthResult<SessionTokens> {
    let tokens = session::generate_session_tokens(opts)?;
    req.extensions_mut().insert(tokens.session.clone());
    Ok(tokens)
}

/// Exchange a refresh token (argument, else cookie) for a fresh pair and
/// attach the new session to the request.
pub async fn refresh_session_tokens(
    req: &HttpRequest,
    token: Option<&str>,
    kind: TokenKind,
    store: Option<&SessionStore>,
) -> AuthResult<RefreshedTokens> {
    let fallback = cookie_token(req);
    let token = token.map(str::to_string).or(fallback);

    let refreshed = session::refresh_session_tokens(token.as_deref(), kind, store).await?;
    req.extensions_mut().insert(refreshed.session.clone());
    Ok(refreshed)
}

/// Blocklist the supplied refresh token (argument, else cookie) together
/// with any token already on the request's session, and attach the terminal
/// revoked session.
pub async fn revoke_session_token(
    req: &HttpRequest,
    token: Option<&str>,
    kind: TokenKind,
    store: &SessionStore,
) -> AuthResult<Session> {
    let fallback = cookie_token(req);
    let token = token.map(str::to_string).or(fallback);
    let session_token = req
        .extensions()
        .get::<Session>()
        .and_then(|session| session.token.clone());

    let revoked =
        session::revoke_session_token(token.as_deref(), session_token.as_deref(), kind, store)
            .await?;
    req.extensions_mut().insert(revoked.clone());
    Ok(revoked)
}
