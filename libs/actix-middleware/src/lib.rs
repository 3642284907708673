//! Actix Web guard layer for the zanix auth core.
//!
//! Four transforms compose the per-request contract: [`AuthTokenValidation`]
//! authenticates the bearer token and attaches a session to the request
//! extensions, [`RateLimitGuard`] protects unauthenticated routes,
//! [`RequirePermissions`] enforces scopes, and [`SessionResponseHeaders`]
//! serializes whatever session is left on the request back onto the
//! response. Failure responses always carry session headers describing the
//! attempt, never bare error bodies.

mod request;

pub mod auth_guard;
pub mod permissions;
pub mod rate_limit_guard;
pub mod session_flows;
pub mod session_headers;

pub use auth_guard::{AuthGuardConfig, AuthTokenValidation};
pub use permissions::RequirePermissions;
pub use rate_limit_guard::RateLimitGuard;
pub use session_flows::{issue_session_tokens, refresh_session_tokens, revoke_session_token};
pub use session_headers::SessionResponseHeaders;
