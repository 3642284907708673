//! Session model and access/refresh token builders.
//!
//! A [`Session`] is the request-local projection of a verified token. Token
//! builders select algorithm and signing key from the [`TokenKind`] table and
//! delegate the wire format to the [`crate::jwt`] codec.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use error_types::{codes, messages, AuthError, AuthResult};
use jsonwebtoken::Algorithm;

use crate::jwt::{self, Claims};
use crate::rate_limit::DEFAULT_SESSION_RATE_LIMIT;
use crate::store::SessionStore;
use crate::{blocklist, config, headers, keys, ttl};

pub const ACCESS_TOKEN_TTL: &str = "1h";
pub const REFRESH_TOKEN_TTL: &str = "1y";
pub const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 3_600;

/// Token families. Selects the algorithm, key space and authorization header
/// for everything downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    User,
    Api,
}

impl TokenKind {
    pub fn algorithm(self) -> Algorithm {
        match self {
            TokenKind::User => Algorithm::HS256,
            TokenKind::Api => Algorithm::RS256,
        }
    }

    pub fn authorization_header(self) -> &'static str {
        match self {
            TokenKind::User => "Authorization",
            TokenKind::Api => headers::HEADER_API_AUTHORIZATION,
        }
    }

    pub fn subject_header(self) -> &'static str {
        match self {
            TokenKind::User => headers::HEADER_USER_ID,
            TokenKind::Api => headers::HEADER_API_ID,
        }
    }

    pub fn status_header(self) -> &'static str {
        match self {
            TokenKind::User => headers::HEADER_USER_SESSION_STATUS,
            TokenKind::Api => headers::HEADER_API_SESSION_STATUS,
        }
    }

    /// Only user sessions round-trip their refresh token through a header.
    pub fn token_header(self) -> Option<&'static str> {
        match self {
            TokenKind::User => Some(headers::HEADER_APP_TOKEN),
            TokenKind::Api => None,
        }
    }

    pub fn session_type(self) -> SessionType {
        match self {
            TokenKind::User => SessionType::User,
            TokenKind::Api => SessionType::Api,
        }
    }

    fn signing_key_prefix(self) -> &'static str {
        match self {
            TokenKind::User => keys::HMAC_KEY_PREFIX,
            TokenKind::Api => keys::RSA_PRIVATE_KEY_PREFIX,
        }
    }

    fn verification_key_prefix(self) -> &'static str {
        match self {
            TokenKind::User => keys::HMAC_KEY_PREFIX,
            TokenKind::Api => keys::RSA_PUBLIC_KEY_PREFIX,
        }
    }

    /// Active signing material and the `kid` to stamp on the header.
    pub fn signing_key(self) -> AuthResult<(String, Option<String>)> {
        let entry = keys::active_key(self.signing_key_prefix())?;
        Ok((self.decode_key_material(entry.value)?, entry.version))
    }

    /// Verification material for the key the token names via `kid`.
    pub fn verification_key(self, kid: Option<&str>) -> AuthResult<String> {
        let value = keys::key_by_kid(self.verification_key_prefix(), kid)?;
        self.decode_key_material(value)
    }

    // RSA keys are stored base64-encoded at rest
    fn decode_key_material(self, value: String) -> AuthResult<String> {
        match self {
            TokenKind::User => Ok(value),
            TokenKind::Api => {
                let decoded = crypto_core::b64::decode_standard(value.trim()).map_err(|_| {
                    AuthError::internal(codes::MISSING_KEY, "RSA key is not valid base64.")
                })?;
                String::from_utf8(decoded).map_err(|_| {
                    AuthError::internal(codes::MISSING_KEY, "RSA key is not valid UTF-8 PEM.")
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    User,
    Api,
    Anonymous,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::User => "user",
            SessionType::Api => "api",
            SessionType::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Failed,
    Unconfirmed,
    Blocked,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Failed => "failed",
            SessionStatus::Unconfirmed => "unconfirmed",
            SessionStatus::Blocked => "blocked",
            SessionStatus::Revoked => "revoked",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionStatus::Failed | SessionStatus::Blocked | SessionStatus::Revoked
        )
    }
}

/// Request-local session. Treated as immutable once attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The token's `jti`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SessionType,
    pub subject: Option<String>,
    #[serde(rename = "rateLimit")]
    pub rate_limit: u32,
    pub scope: Vec<String>,
    pub status: SessionStatus,
    /// Remaining claims after extracting the reserved fields.
    pub payload: Map<String, Value>,
    /// The refresh token, populated when known.
    pub token: Option<String>,
}

impl Session {
    pub fn from_claims(kind: SessionType, claims: &Claims, status: SessionStatus) -> Self {
        let mut payload = match serde_json::to_value(claims) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for reserved in ["jti", "rateLimit", "sub", "aud"] {
            payload.remove(reserved);
        }

        Self {
            id: claims.jti.clone().unwrap_or_default(),
            kind,
            subject: claims.sub.clone(),
            rate_limit: claims.rate_limit.unwrap_or(DEFAULT_SESSION_RATE_LIMIT),
            scope: claims.scope(),
            status,
            payload,
            token: None,
        }
    }

    pub fn anonymous(id: String, rate_limit: u32) -> Self {
        Self {
            id,
            kind: SessionType::Anonymous,
            subject: None,
            rate_limit,
            scope: Vec::new(),
            status: SessionStatus::Unconfirmed,
            payload: Map::new(),
            token: None,
        }
    }

    /// `exp` of the underlying token, when known.
    pub fn expiration(&self) -> i64 {
        self.payload
            .get("exp")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

/// Options for minting an application token. Serializable because refresh
/// tokens embed the options used for their companion access token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppTokenOptions {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    // Never serialized: the embedded copy inside a refresh token must not
    // leak key material.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

impl AppTokenOptions {
    pub fn new(subject: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            subject: subject.into(),
            kind,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub old_token: String,
    pub claims: Claims,
    pub session: Session,
}

/// Mint a token of the given kind with the currently active signing key.
///
/// `payload.permissions` is promoted into the `aud` claim and `rateLimit`
/// defaults when absent.
pub fn create_app_token(opts: &AppTokenOptions) -> AuthResult<String> {
    let (signing_key, kid) = opts.kind.signing_key()?;

    let mut payload = opts.payload.clone().unwrap_or_default();
    let permissions = payload.remove("permissions");
    let mut claims: Claims = serde_json::from_value(Value::Object(payload)).map_err(|err| {
        AuthError::internal(codes::SIGNING_ERROR, format!("Invalid token payload: {err}"))
    })?;

    claims.sub = Some(opts.subject.clone());
    if let Some(permissions) = permissions {
        claims.aud = Some(serde_json::from_value(permissions).map_err(|err| {
            AuthError::internal(
                codes::SIGNING_ERROR,
                format!("`permissions` must be a string or string sequence: {err}"),
            )
        })?);
    }
    if claims.rate_limit.is_none() {
        claims.rate_limit = Some(DEFAULT_SESSION_RATE_LIMIT);
    }
    if opts.kind == TokenKind::Api && claims.secure_data.is_some() && opts.encryption_key.is_none()
    {
        return Err(AuthError::internal(
            codes::SIGNING_ERROR,
            "API tokens carrying secureData require an explicit encryption key.",
        ));
    }

    let create_opts = jwt::CreateOptions {
        algorithm: Some(opts.kind.algorithm()),
        expiration: opts.expiration.clone(),
        kid,
        encryption_key: opts.encryption_key.clone(),
    };
    jwt::create(claims, &signing_key, &create_opts)
}

/// Short-lived credential presented on each request. Expirations above one
/// hour are rejected.
pub fn create_access_token(opts: &AppTokenOptions) -> AuthResult<IssuedToken> {
    if let Some(raw) = &opts.expiration {
        if ttl::parse_ttl(raw)? > MAX_ACCESS_TOKEN_TTL_SECS {
            return Err(AuthError::internal(
                codes::INVALID_EXPIRATION,
                format!("Access token expiration `{raw}` exceeds the one hour cap."),
            ));
        }
    }
    let token = create_app_token(opts)?;
    let claims = jwt::decode(&token)?.claims;
    let session = Session::from_claims(opts.kind.session_type(), &claims, SessionStatus::Active);
    Ok(IssuedToken { token, session })
}

/// Long-lived credential used solely to mint new access tokens.
pub fn create_refresh_token(opts: &AppTokenOptions) -> AuthResult<String> {
    create_app_token(opts)
}

/// Mint the access/refresh pair: access capped at one hour, refresh at one
/// year with the access options embedded so it can regenerate the pair.
pub fn generate_session_tokens(opts: &AppTokenOptions) -> AuthResult<SessionTokens> {
    let access_opts = AppTokenOptions {
        expiration: Some(ACCESS_TOKEN_TTL.to_string()),
        ..opts.clone()
    };
    let issued = create_access_token(&access_opts)?;

    let mut refresh_payload = opts.payload.clone().unwrap_or_default();
    refresh_payload.insert(
        "access".to_string(),
        serde_json::to_value(opts).map_err(|err| {
            AuthError::internal(
                codes::SIGNING_ERROR,
                format!("Failed to embed access options: {err}"),
            )
        })?,
    );
    let refresh_opts = AppTokenOptions {
        expiration: Some(REFRESH_TOKEN_TTL.to_string()),
        payload: Some(refresh_payload),
        ..opts.clone()
    };
    let refresh_token = create_refresh_token(&refresh_opts)?;

    let mut session = issued.session;
    session.token = Some(refresh_token.clone());

    Ok(SessionTokens {
        access_token: issued.token,
        refresh_token,
        session,
    })
}

/// Exchange a refresh token for a fresh pair.
///
/// Verification resolves the key exactly as the guard does (`kid` against the
/// registry), and the blocklist is consulted when a store is supplied.
pub async fn refresh_session_tokens(
    token: Option<&str>,
    kind: TokenKind,
    store: Option<&SessionStore>,
) -> AuthResult<RefreshedTokens> {
    let token =
        token.ok_or_else(|| AuthError::unauthorized(codes::INVALID_TOKEN, messages::MISSING_REFRESH))?;

    let decoded = jwt::decode(token)?;
    let verification_key = kind.verification_key(decoded.header.kid.as_deref())?;
    let claims = jwt::verify(
        token,
        &verification_key,
        &jwt::VerifyOptions {
            algorithm: Some(kind.algorithm()),
            issuer: Some(config::default_jwt_issuer()),
            ..Default::default()
        },
    )?;

    // Access tokens must not be usable as refresh tokens.
    let access = claims.access.clone().ok_or_else(|| {
        AuthError::forbidden(codes::INVALID_TOKEN, "The provided token is not a refresh token.")
    })?;
    let access_opts: AppTokenOptions = serde_json::from_value(access).map_err(|_| {
        AuthError::forbidden(codes::INVALID_TOKEN, "The provided token is not a refresh token.")
    })?;

    if let (Some(store), Some(jti)) = (store, claims.jti.as_deref()) {
        if blocklist::check(jti, store).await? {
            return Err(AuthError::permission_denied(messages::TOKEN_BLOCKLISTED));
        }
    }

    let tokens = generate_session_tokens(&access_opts)?;
    Ok(RefreshedTokens {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        old_token: token.to_string(),
        claims,
        session: tokens.session,
    })
}

/// Blocklist one or many tokens in parallel, returning their decoded claims.
pub async fn revoke_app_tokens(tokens: &[String], store: &SessionStore) -> AuthResult<Vec<Claims>> {
    futures::future::try_join_all(tokens.iter().map(|token| blocklist::add(token, store))).await
}

/// Revoke a session: blocklist the supplied refresh token plus any
/// context-known one, and return the terminal `revoked` session.
pub async fn revoke_session_token(
    token: Option<&str>,
    session_token: Option<&str>,
    kind: TokenKind,
    store: &SessionStore,
) -> AuthResult<Session> {
    let mut tokens: Vec<String> = Vec::new();
    if let Some(token) = token {
        tokens.push(token.to_string());
    }
    if let Some(token) = session_token {
        if Some(token) != tokens.first().map(String::as_str) {
            tokens.push(token.to_string());
        }
    }
    if tokens.is_empty() {
        return Err(AuthError::unauthorized(
            codes::INVALID_TOKEN,
            messages::MISSING_REFRESH,
        ));
    }

    let mut revoked = revoke_app_tokens(&tokens, store).await?;
    let claims = revoked.remove(0);
    let mut session = Session::from_claims(kind.session_type(), &claims, SessionStatus::Revoked);
    session.payload.insert("exp".to_string(), Value::from(0));
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SECRET: &str = "session-secret";

    fn with_hmac_env<T>(f: impl FnOnce() -> T) -> T {
        keys::clear();
        std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);
        let out = f();
        std::env::remove_var(keys::HMAC_KEY_PREFIX);
        keys::clear();
        out
    }

    #[test]
    #[serial]
    fn test_create_app_token_promotes_permissions() {
        with_hmac_env(|| {
            let mut payload = Map::new();
            payload.insert(
                "permissions".to_string(),
                Value::from(vec!["posts:read", "posts:write"]),
            );
            let opts = AppTokenOptions {
                payload: Some(payload),
                ..AppTokenOptions::new("user-1", TokenKind::User)
            };
            let token = create_app_token(&opts).unwrap();
            let claims = jwt::decode(&token).unwrap().claims;

            assert_eq!(
                claims.scope(),
                vec!["posts:read".to_string(), "posts:write".to_string()]
            );
            assert_eq!(claims.rate_limit, Some(100));
            assert_eq!(claims.sub.as_deref(), Some("user-1"));
        });
    }

    #[test]
    #[serial]
    fn test_access_token_cap() {
        with_hmac_env(|| {
            let opts = AppTokenOptions {
                expiration: Some("2h".to_string()),
                ..AppTokenOptions::new("user-1", TokenKind::User)
            };
            let err = create_access_token(&opts).unwrap_err();
            assert_eq!(err.code, codes::INVALID_EXPIRATION);

            let opts = AppTokenOptions {
                expiration: Some("30m".to_string()),
                ..AppTokenOptions::new("user-1", TokenKind::User)
            };
            let issued = create_access_token(&opts).unwrap();
            assert_eq!(issued.session.status, SessionStatus::Active);
            assert_eq!(issued.session.subject.as_deref(), Some("user-1"));
        });
    }

    #[test]
    #[serial]
    fn test_generate_session_tokens_embeds_access() {
        with_hmac_env(|| {
            let tokens =
                generate_session_tokens(&AppTokenOptions::new("user-1", TokenKind::User)).unwrap();

            let refresh = jwt::decode(&tokens.refresh_token).unwrap().claims;
            let embedded: AppTokenOptions =
                serde_json::from_value(refresh.access.unwrap()).unwrap();
            assert_eq!(embedded.subject, "user-1");
            assert_eq!(embedded.kind, TokenKind::User);

            let access = jwt::decode(&tokens.access_token).unwrap().claims;
            assert!(access.access.is_none());
            let now = ttl::unix_now();
            assert!(access.exp.unwrap() <= now + 3_600);
            assert!(refresh.exp.unwrap() > now + 31_000_000);

            assert_eq!(tokens.session.token.as_deref(), Some(tokens.refresh_token.as_str()));
            assert_eq!(tokens.session.status, SessionStatus::Active);
        });
    }

    #[test]
    #[serial]
    fn test_encryption_key_never_embedded() {
        with_hmac_env(|| {
            let opts = AppTokenOptions {
                encryption_key: Some("super-secret".to_string()),
                ..AppTokenOptions::new("user-1", TokenKind::User)
            };
            let tokens = generate_session_tokens(&opts).unwrap();
            let refresh = jwt::decode(&tokens.refresh_token).unwrap().claims;
            assert!(!refresh.access.unwrap().to_string().contains("super-secret"));
        });
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_flow() {
        let store = SessionStore::new();
        keys::clear();
        std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);

        let tokens =
            generate_session_tokens(&AppTokenOptions::new("user-1", TokenKind::User)).unwrap();
        let refreshed = refresh_session_tokens(
            Some(&tokens.refresh_token),
            TokenKind::User,
            Some(&store),
        )
        .await
        .unwrap();

        assert_eq!(refreshed.old_token, tokens.refresh_token);
        assert_eq!(refreshed.session.subject.as_deref(), Some("user-1"));
        assert_ne!(refreshed.access_token, tokens.access_token);

        std::env::remove_var(keys::HMAC_KEY_PREFIX);
        keys::clear();
    }

    #[tokio::test]
    #[serial]
    async fn test_access_token_rejected_as_refresh() {
        let store = SessionStore::new();
        keys::clear();
        std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);

        let tokens =
            generate_session_tokens(&AppTokenOptions::new("user-1", TokenKind::User)).unwrap();
        let err = refresh_session_tokens(
            Some(&tokens.access_token),
            TokenKind::User,
            Some(&store),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, codes::INVALID_TOKEN);

        std::env::remove_var(keys::HMAC_KEY_PREFIX);
        keys::clear();
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_rejects_blocklisted() {
        let store = SessionStore::new();
        keys::clear();
        std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);

        let tokens =
            generate_session_tokens(&AppTokenOptions::new("user-1", TokenKind::User)).unwrap();
        blocklist::add(&tokens.refresh_token, &store).await.unwrap();

        let err = refresh_session_tokens(
            Some(&tokens.refresh_token),
            TokenKind::User,
            Some(&store),
        )
        .await
        .unwrap_err();
        assert!(err.is_permission_denied());

        std::env::remove_var(keys::HMAC_KEY_PREFIX);
        keys::clear();
    }

    #[tokio::test]
    #[serial]
    async fn test_revoke_session_token() {
        let store = SessionStore::new();
        keys::clear();
        std::env::set_var(keys::HMAC_KEY_PREFIX, SECRET);

        let tokens =
            generate_session_tokens(&AppTokenOptions::new("user-1", TokenKind::User)).unwrap();
        let session = revoke_session_token(
            Some(&tokens.refresh_token),
            None,
            TokenKind::User,
            &store,
        )
        .await
        .unwrap();

        assert_eq!(session.status, SessionStatus::Revoked);
        assert_eq!(session.expiration(), 0);
        assert!(blocklist::check(&session.id, &store).await.unwrap());

        let err = revoke_session_token(None, None, TokenKind::User, &store)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);

        std::env::remove_var(keys::HMAC_KEY_PREFIX);
        keys::clear();
    }

    #[test]
    #[serial]
    fn test_api_secure_data_requires_encryption_key() {
        let pair = crypto_core::keys::generate_rsa_keypair(2048).unwrap();
        keys::clear();
        std::env::set_var(keys::RSA_PRIVATE_KEY_PREFIX, &pair.private_b64);

        let mut payload = Map::new();
        payload.insert("secureData".to_string(), Value::from("card=4242"));
        let opts = AppTokenOptions {
            payload: Some(payload.clone()),
            ..AppTokenOptions::new("svc-1", TokenKind::Api)
        };
        assert!(create_app_token(&opts).is_err());

        let opts = AppTokenOptions {
            payload: Some(payload),
            encryption_key: Some("payload-key".to_string()),
            ..AppTokenOptions::new("svc-1", TokenKind::Api)
        };
        assert!(create_app_token(&opts).is_ok());

        std::env::remove_var(keys::RSA_PRIVATE_KEY_PREFIX);
        keys::clear();
    }

    #[test]
    fn test_session_from_claims_extracts_reserved() {
        let mut claims = Claims {
            jti: Some("id-1".to_string()),
            sub: Some("user-1".to_string()),
            rate_limit: Some(5),
            exp: Some(1_234),
            ..Default::default()
        };
        claims
            .extra
            .insert("tenant".to_string(), Value::from("acme"));

        let session = Session::from_claims(SessionType::User, &claims, SessionStatus::Active);
        assert_eq!(session.id, "id-1");
        assert_eq!(session.rate_limit, 5);
        assert_eq!(session.expiration(), 1_234);
        assert_eq!(session.payload["tenant"], "acme");
        assert!(!session.payload.contains_key("sub"));
        assert!(!session.payload.contains_key("jti"));
    }
}
