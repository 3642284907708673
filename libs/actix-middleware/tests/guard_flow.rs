//! End-to-end guard behavior against an in-process store.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{test, web, App, HttpResponse};
use serial_test::serial;

use actix_middleware::{
    AuthGuardConfig, AuthTokenValidation, RateLimitGuard, RequirePermissions,
    SessionResponseHeaders,
};
use auth_core::jwt::{self, Claims};
use auth_core::session::TokenKind;
use auth_core::store::SessionStore;
use auth_core::{blocklist, keys};

const SECRET: &str = "my-secret";

fn set_hmac_env() {
    keys::clear();
    std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);
}

fn clear_hmac_env() {
    std::env::remove_var(keys::HMAC_KEY_PREFIX);
    keys::clear();
}

async fn ok_handler() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

fn guard_config(rate_limit: bool) -> AuthGuardConfig {
    AuthGuardConfig {
        rate_limit,
        ..Default::default()
    }
}

#[actix_rt::test]
#[serial]
async fn test_missing_bearer_yields_failure_headers() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let app = test::init_service(
        App::new()
            .wrap(AuthTokenValidation::new(guard_config(false), store))
            .wrap(SessionResponseHeaders::new())
            .route("/private", web::get().to(ok_handler)),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/private").to_request()).await;

    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers().get("X-Znx-User-Session-Status").unwrap(),
        "failed"
    );
    let subject = resp
        .headers()
        .get("X-Znx-User-Id")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(subject.starts_with("anonymous-"));
    assert!(resp.headers().get(header::SET_COOKIE).is_none());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Authorization token is missing or invalid.");

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_valid_token_activates_session() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let token = jwt::create(Claims::default(), SECRET, &Default::default()).unwrap();

    let app = test::init_service(
        App::new()
            .wrap(AuthTokenValidation::new(guard_config(false), store))
            .wrap(SessionResponseHeaders::new())
            .route("/private", web::get().to(ok_handler)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/private")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("X-Znx-User-Session-Status").unwrap(),
        "active"
    );
    // no subject claim: the id falls back to the token's jti (a UUID)
    let subject = resp
        .headers()
        .get("X-Znx-User-Id")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(subject.len(), 36);
    assert!(!subject.starts_with("anonymous-"));

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_rate_limit_blocks_third_request() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let mut claims = Claims::default();
    claims.rate_limit = Some(2);
    let token = jwt::create(claims, SECRET, &Default::default()).unwrap();

    let app = test::init_service(
        App::new()
            .wrap(AuthTokenValidation::new(guard_config(true), store))
            .wrap(SessionResponseHeaders::new())
            .route("/private", web::get().to(ok_handler)),
    )
    .await;

    for expected_remaining in ["1", "0"] {
        let req = test::TestRequest::get()
            .uri("/private")
            .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("X-Znx-RateLimit-Remaining").unwrap(),
            expected_remaining
        );
    }

    let req = test::TestRequest::get()
        .uri("/private")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 429);
    assert_eq!(
        resp.headers().get("X-Znx-User-Session-Status").unwrap(),
        "blocked"
    );
    assert!(resp.headers().get(header::RETRY_AFTER).is_some());

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_blocklisted_token_rejected() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let token = jwt::create(Claims::default(), SECRET, &Default::default()).unwrap();
    blocklist::add(&token, &store).await.ok();

    let app = test::init_service(
        App::new()
            .wrap(AuthTokenValidation::new(guard_config(false), store))
            .wrap(SessionResponseHeaders::new())
            .route("/private", web::get().to(ok_handler)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/private")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["message"],
        "The provided token has been revoked or is blocklisted."
    );

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_cookie_accepting_client_gets_cookie_list() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let app = test::init_service(
        App::new()
            .wrap(AuthTokenValidation::new(guard_config(false), store))
            .wrap(SessionResponseHeaders::new())
            .route("/private", web::get().to(ok_handler)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/private")
        .insert_header(("X-Znx-Cookies-Accepted", "true"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 401);
    let cookies: Vec<String> = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .map(|value| value.to_str().unwrap().to_string())
        .collect();

    assert!(cookies
        .iter()
        .any(|c| c.starts_with("X-Znx-User-Session-Status=failed; Max-Age=0;")));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("X-Znx-Cookies-Accepted=true; Max-Age=0;")));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("X-Znx-App-Token=; Max-Age=0;")));
    for cookie in &cookies {
        assert!(cookie.ends_with("Path=/; HttpOnly; SameSite=Strict"));
    }

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_permissions_guard() {
    set_hmac_env();
    let store = Arc::new(SessionStore::new());
    let mut claims = Claims::default();
    claims.aud = Some(vec!["posts:read".to_string()].into());
    let token = jwt::create(claims, SECRET, &Default::default()).unwrap();

    let app = test::init_service(
        App::new()
            .service(
                web::resource("/read")
                    .wrap(RequirePermissions::new(["posts:read"]))
                    .wrap(AuthTokenValidation::new(guard_config(false), store.clone()))
                    .route(web::get().to(ok_handler)),
            )
            .service(
                web::resource("/admin")
                    .wrap(RequirePermissions::new(["admin"]))
                    .wrap(AuthTokenValidation::new(guard_config(false), store))
                    .route(web::get().to(ok_handler)),
            ),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/read")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri("/admin")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    clear_hmac_env();
}

#[actix_rt::test]
#[serial]
async fn test_anonymous_rate_limit_guard() {
    let store = Arc::new(SessionStore::new());
    let app = test::init_service(
        App::new()
            .wrap(RateLimitGuard::new(store).with_anonymous_limit(2))
            .route("/public", web::get().to(ok_handler)),
    )
    .await;

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/public")
            .insert_header(("x-real-ip", "203.0.113.7"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().get("X-Znx-RateLimit-Limit").is_some());
    }

    let req = test::TestRequest::get()
        .uri("/public")
        .insert_header(("x-real-ip", "203.0.113.7"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().get(header::RETRY_AFTER).is_some());
}

#[actix_rt::test]
#[serial]
async fn test_zero_anonymous_limit_requires_auth() {
    let store = Arc::new(SessionStore::new());
    let app = test::init_service(
        App::new()
            .wrap(RateLimitGuard::new(store).with_anonymous_limit(0))
            .route("/public", web::get().to(ok_handler)),
    )
    .await;

    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/public").to_request()).await;
    assert_eq!(resp.status(), 401);
}
