//! Generic OAuth2 user-info exchange used to bootstrap a local session.
//!
//! The core is a relying party only: given a provider access token it fetches
//! the user-info endpoint and mints a local access/refresh pair. Provider
//! token exchange and consent screens stay with the host.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use error_types::{codes, AuthError, AuthResult};

use crate::session::{self, AppTokenOptions, SessionTokens, TokenKind};

#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_endpoint: String,
    pub userinfo_endpoint: String,
    pub scope: String,
}

impl OAuth2Config {
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            userinfo_endpoint: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            scope: "openid email profile".to_string(),
        }
    }

    pub fn google_from_env() -> AuthResult<Self> {
        let client_id = env_var("GOOGLE_OAUTH2_CLIENT_ID")?;
        let client_secret = env_var("GOOGLE_OAUTH2_CLIENT_SECRET")?;
        let redirect_uri = env_var("GOOGLE_OAUTH2_REDIRECT_URI")?;
        Ok(Self::google(client_id, client_secret, redirect_uri))
    }
}

fn env_var(name: &str) -> AuthResult<String> {
    std::env::var(name).map_err(|_| {
        AuthError::internal(codes::OAUTH_ERROR, format!("`{name}` is not configured."))
    })
}

/// Provider-agnostic user-info payload; anything non-standard lands in
/// `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2UserInfo {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OAuth2UserInfo {
    /// The local session subject: email preferred, provider subject id
    /// otherwise.
    pub fn subject(&self) -> AuthResult<String> {
        self.email
            .clone()
            .or_else(|| self.sub.clone())
            .ok_or_else(|| {
                AuthError::unauthorized(
                    codes::OAUTH_ERROR,
                    "Provider user-info carries neither email nor subject.",
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct OAuth2Login {
    pub user: OAuth2UserInfo,
    pub tokens: SessionTokens,
}

#[derive(Clone)]
pub struct OAuth2Connector {
    config: OAuth2Config,
    http: Client,
}

impl OAuth2Connector {
    pub fn new(config: OAuth2Config) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    pub fn google_from_env() -> AuthResult<Self> {
        Ok(Self::new(OAuth2Config::google_from_env()?))
    }

    /// The provider authorization URL the host redirects browsers to.
    pub fn generate_auth_url(&self, state: Option<&str>) -> AuthResult<String> {
        let mut url = reqwest::Url::parse(&self.config.auth_endpoint).map_err(|err| {
            AuthError::internal(
                codes::OAUTH_ERROR,
                format!("Invalid authorization endpoint: {err}"),
            )
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        if let Some(state) = state {
            url.query_pairs_mut().append_pair("state", state);
        }
        Ok(url.to_string())
    }

    /// Exchange a provider access token for a local session: fetch the
    /// user-info endpoint and mint an access/refresh pair for the subject.
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<OAuth2Login> {
        let response = self
            .http
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| {
                AuthError::internal(
                    codes::OAUTH_ERROR,
                    format!("User-info request failed: {err}"),
                )
            })?;

        if !response.status().is_success() {
            return Err(AuthError::unauthorized(
                codes::OAUTH_ERROR,
                format!(
                    "User-info request rejected with status {}",
                    response.status()
                ),
            ));
        }

        let user: OAuth2UserInfo = response.json().await.map_err(|err| {
            AuthError::internal(
                codes::OAUTH_ERROR,
                format!("Failed to parse user-info response: {err}"),
            )
        })?;

        let subject = user.subject()?;
        tracing::info!(%subject, "OAuth2 user-info exchange succeeded");

        let tokens =
            session::generate_session_tokens(&AppTokenOptions::new(subject, TokenKind::User))?;
        Ok(OAuth2Login { user, tokens })
    }
}
