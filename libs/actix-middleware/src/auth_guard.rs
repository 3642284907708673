//! Bearer-token authentication guard.
//!
//! Per request: extract the bearer for the configured token kind, resolve
//! the verification key via the token's `kid`, verify signature and claims,
//! consult the blocklist, attach the session, then apply the session's rate
//! limit. Failures short-circuit into a response that carries default
//! session headers at the appropriate status.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage, HttpResponse};
use futures::future::{ready, Ready};

use auth_core::headers;
use auth_core::jwt;
use auth_core::session::{Session, SessionStatus, TokenKind};
use auth_core::store::SessionStore;
use auth_core::{blocklist, config};
use error_types::{codes, messages, AuthError, AuthErrorKind};

use crate::rate_limit_guard::enforce_session_limit;
use crate::request::{
    append_rate_limit_headers, cookie_map, failure_response, RateMeta, RequestHeaders,
};

#[derive(Debug, Clone)]
pub struct AuthGuardConfig {
    pub kind: TokenKind,
    /// Expected permissions; any overlap with the token's `aud` grants
    /// access.
    pub permissions: Vec<String>,
    /// Explicit expected subject; falls back to the client-declared one.
    pub subject: Option<String>,
    pub encryption_key: Option<String>,
    /// Disable to skip the rate-limit step entirely.
    pub rate_limit: bool,
}

impl Default for AuthGuardConfig {
    fn default() -> Self {
        Self {
            kind: TokenKind::User,
            permissions: Vec::new(),
            subject: None,
            encryption_key: None,
            rate_limit: true,
        }
    }
}

pub struct AuthTokenValidation {
    config: AuthGuardConfig,
    store: Arc<SessionStore>,
}

impl AuthTokenValidation {
    pub fn new(config: AuthGuardConfig, store: Arc<SessionStore>) -> Self {
        Self { config, store }
    }

    pub fn user(store: Arc<SessionStore>) -> Self {
        Self::new(AuthGuardConfig::default(), store)
    }

    pub fn api(store: Arc<SessionStore>) -> Self {
        Self::new(
            AuthGuardConfig {
                kind: TokenKind::Api,
                ..Default::default()
            },
            store,
        )
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthTokenValidation
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthTokenValidationService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthTokenValidationService {
            service: Rc::new(service),
            config: self.config.clone(),
            store: self.store.clone(),
        }))
    }
}

pub struct AuthTokenValidationService<S> {
    service: Rc<S>,
    config: AuthGuardConfig,
    store: Arc<SessionStore>,
}

impl<S, B> Service<ServiceRequest> for AuthTokenValidationService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let config = self.config.clone();
        let store = self.store.clone();

        Box::pin(async move {
            match authorize(&req, &config, &store).await {
                Ok((session, rate)) => {
                    req.extensions_mut().insert(session);
                    let res = service.call(req).await?;
                    let mut res = res.map_into_left_body();
                    if let Some(rate) = rate {
                        append_rate_limit_headers(res.headers_mut(), &rate);
                    }
                    Ok(res)
                }
                Err(denied) => {
                    let response = denied.into_response(&req, config.kind);
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

pub(crate) struct Denied {
    pub error: AuthError,
    pub rate: Option<RateMeta>,
}

impl Denied {
    pub(crate) fn from(error: AuthError) -> Self {
        Self { error, rate: None }
    }

    pub(crate) fn into_response(self, req: &ServiceRequest, kind: TokenKind) -> HttpResponse {
        let status = if self.error.kind == AuthErrorKind::TooManyRequests {
            SessionStatus::Blocked
        } else {
            SessionStatus::Failed
        };
        tracing::warn!(
            code = self.error.code,
            path = %req.path(),
            "request denied: {}",
            self.error.cause
        );

        let defaults = headers::default_session_headers(
            &RequestHeaders(req.headers()),
            &cookie_map(req.request()),
            kind,
            status,
        );
        let mut response = failure_response(&self.error, &defaults);
        if let Some(rate) = &self.rate {
            append_rate_limit_headers(response.headers_mut(), rate);
        }
        response
    }
}

async fn authorize(
    req: &ServiceRequest,
    config: &AuthGuardConfig,
    store: &SessionStore,
) -> Result<(Session, Option<RateMeta>), Denied> {
    let token = req
        .headers()
        .get(config.kind.authorization_header())
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            Denied::from(AuthError::unauthorized(
                codes::UNAUTHORIZED,
                messages::MISSING_BEARER,
            ))
        })?;

    // kid must be read before verification to pick the right key
    let decoded = jwt::decode(token).map_err(Denied::from)?;
    let verification_key = config
        .kind
        .verification_key(decoded.header.kid.as_deref())
        .map_err(Denied::from)?;

    let client_subject = headers::client_subject(
        &RequestHeaders(req.headers()),
        &cookie_map(req.request()),
        config.kind,
    );
    let claims = jwt::verify(
        token,
        &verification_key,
        &jwt::VerifyOptions {
            algorithm: Some(config.kind.algorithm()),
            issuer: Some(config::default_jwt_issuer()),
            subject: config.subject.clone().or(client_subject),
            audience: if config.permissions.is_empty() {
                None
            } else {
                Some(config.permissions.clone())
            },
            encryption_key: config.encryption_key.clone(),
        },
    )
    .map_err(Denied::from)?;

    if let Some(jti) = claims.jti.as_deref() {
        if blocklist::check(jti, store).await.map_err(Denied::from)? {
            return Err(Denied::from(AuthError::permission_denied(
                messages::TOKEN_BLOCKLISTED,
            )));
        }
    }

    let mut session =
        Session::from_claims(config.kind.session_type(), &claims, SessionStatus::Active);
    session.token = Some(token.to_string());

    let rate = if config.rate_limit {
        let meta = enforce_session_limit(&session, store)
            .await
            .map_err(Denied::from)?;
        if !meta.outcome.can_continue {
            let retry_after = meta.outcome.retry_after(meta.window_seconds);
            return Err(Denied {
                error: AuthError::too_many_requests(messages::RATE_LIMIT_EXCEEDED, retry_after),
                rate: Some(meta),
            });
        }
        Some(meta)
    } else {
        None
    };

    Ok((session, rate))
}
