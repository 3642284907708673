//! Scope enforcement over the attached session.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use futures::future::{ready, Ready};

use auth_core::scope;
use auth_core::session::{Session, SessionType, TokenKind};
use error_types::{codes, messages, AuthError};

use crate::auth_guard::Denied;

/// Factory guard: requires the session's scope to overlap the configured
/// permissions. Register after [`crate::AuthTokenValidation`].
pub struct RequirePermissions {
    required: Vec<String>,
}

impl RequirePermissions {
    pub fn new(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequirePermissions
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequirePermissionsService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequirePermissionsService {
            service: Rc::new(service),
            required: self.required.clone(),
        }))
    }
}

pub struct RequirePermissionsService<S> {
    service: Rc<S>,
    required: Vec<String>,
}

impl<S, B> Service<ServiceRequest> for RequirePermissionsService<S>
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
        let required = self.required.clone();

        Box::pin(async move {
            let session = req.extensions().get::<Session>().cloned();
            let kind = match session.as_ref().map(|session| session.kind) {
                Some(SessionType::Api) => TokenKind::Api,
                _ => TokenKind::User,
            };

            let denial = match &session {
                None => Some(AuthError::unauthorized(
                    codes::UNAUTHORIZED,
                    messages::MISSING_BEARER,
                )),
                Some(session) => scope::validate(&required, &session.scope)
                    .err()
                    .map(AuthError::permission_denied),
            };

            if let Some(error) = denial {
                let response = Denied::from(error).into_response(&req, kind);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
