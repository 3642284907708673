//! Response interceptor that serializes the request's session.
//!
//! Runs unconditionally after the handler: whatever session the guards (or a
//! login handler) left in the request extensions is rendered into subject,
//! status and token headers plus cookie lines, then removed so nothing leaks
//! across middleware boundaries.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use futures::future::{ready, Ready};

use auth_core::headers::{self, SessionHeaderOptions};
use auth_core::session::{Session, SessionType, TokenKind};

use crate::request::{append_session_headers, cookie_map, RequestHeaders};

#[derive(Default)]
pub struct SessionResponseHeaders;

impl SessionResponseHeaders {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionResponseHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SessionResponseHeadersService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionResponseHeadersService {
            service: Rc::new(service),
        }))
    }
}

pub struct SessionResponseHeadersService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for SessionResponseHeadersService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let mut res = service.call(req).await?;

            // remove, not read: the session must not outlive its request
            let session = res.request().extensions_mut().remove::<Session>();
            if let Some(session) = session {
                let request = res.request().clone();
                let kind = match session.kind {
                    SessionType::Api => TokenKind::Api,
                    _ => TokenKind::User,
                };
                let cookies = cookie_map(&request);
                let accepted =
                    headers::cookies_accepted(&RequestHeaders(request.headers()), &cookies);

                let rendered = headers::session_headers(&SessionHeaderOptions {
                    cookies_accepted: accepted,
                    status: session.status,
                    kind,
                    subject: session.subject.as_deref().unwrap_or(&session.id),
                    expiration: session.expiration(),
                    refresh_token: session.token.as_deref(),
                });
                append_session_headers(res.headers_mut(), &rendered);
            }

            Ok(res)
        })
    }
}
