//! Standalone rate-limit guard for unauthenticated routes.
//!
//! Routes behind [`crate::AuthTokenValidation`] get their rate limit applied
//! there; this guard covers everything else by deriving an anonymous session
//! from the client IP and user-agent. An `anonymous_limit` of zero turns the
//! guard into an authenticated-only gate.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use futures::future::{ready, Ready};

use auth_core::anonymous;
use auth_core::rate_limit::{self, RateLimitConfig};
use auth_core::session::{Session, SessionType, TokenKind};
use auth_core::store::SessionStore;
use error_types::{codes, messages, AuthError, AuthResult};

use crate::auth_guard::Denied;
use crate::request::{append_rate_limit_headers, RateMeta, RequestHeaders};

pub const DEFAULT_ANONYMOUS_LIMIT: u32 = 100;

/// Count one request against the session's bucket, resolving the quota
/// through the plan table. Shared with the auth guard.
pub(crate) async fn enforce_session_limit(
    session: &Session,
    store: &SessionStore,
) -> AuthResult<RateMeta> {
    let max_requests = rate_limit::plan_lookup(session.rate_limit);
    let spec = RateLimitConfig::new(&session.id, max_requests);
    let window_seconds = spec.window_seconds;
    let max_failed_attempts = spec.max_failed_attempts;

    let outcome = rate_limit::check(store, &spec).await?;
    if !outcome.can_continue && outcome.failed_attempts >= max_failed_attempts {
        tracing::warn!(
            session = %session.id,
            attempts = outcome.failed_attempts,
            "rate-limit escalation threshold reached"
        );
    }

    Ok(RateMeta {
        outcome,
        max_requests,
        window_seconds,
    })
}

pub struct RateLimitGuard {
    anonymous_limit: u32,
    store: Arc<SessionStore>,
}

impl RateLimitGuard {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            anonymous_limit: DEFAULT_ANONYMOUS_LIMIT,
            store,
        }
    }

    pub fn with_anonymous_limit(mut self, limit: u32) -> Self {
        self.anonymous_limit = limit;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitGuardService {
            service: Rc::new(service),
            anonymous_limit: self.anonymous_limit,
            store: self.store.clone(),
        }))
    }
}

pub struct RateLimitGuardService<S> {
    service: Rc<S>,
    anonymous_limit: u32,
    store: Arc<SessionStore>,
}

impl<S, B> Service<ServiceRequest> for RateLimitGuardService<S>
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
        let store = self.store.clone();
        let anonymous_limit = self.anonymous_limit;

        Box::pin(async move {
            let existing = req.extensions().get::<Session>().cloned();
            let kind = match existing.as_ref().map(|session| session.kind) {
                Some(SessionType::Api) => TokenKind::Api,
                _ => TokenKind::User,
            };

            let session = match existing {
                Some(session) => session,
                None => {
                    if anonymous_limit == 0 {
                        let denied = Denied::from(AuthError::unauthorized(
                            codes::UNAUTHORIZED,
                            messages::MISSING_BEARER,
                        ));
                        let response = denied.into_response(&req, kind);
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    let session = anonymous::generate_anonymous_session(
                        anonymous_limit,
                        &RequestHeaders(req.headers()),
                    );
                    req.extensions_mut().insert(session.clone());
                    session
                }
            };

            let meta = match enforce_session_limit(&session, &store).await {
                Ok(meta) => meta,
                Err(error) => {
                    let response = Denied::from(error).into_response(&req, kind);
                    return Ok(req.into_response(response).map_into_right_body());
                }
            };

            if !meta.outcome.can_continue {
                let retry_after = meta.outcome.retry_after(meta.window_seconds);
                let denied = Denied {
                    error: AuthError::too_many_requests(messages::RATE_LIMIT_EXCEEDED, retry_after),
                    rate: Some(meta),
                };
                let response = denied.into_response(&req, kind);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let res = service.call(req).await?;
            let mut res = res.map_into_left_body();
            append_rate_limit_headers(res.headers_mut(), &meta);
            Ok(res)
        })
    }
}
