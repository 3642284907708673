/// Configuration management
use serde::Deserialize;

/// Default `iss` claim stamped on issued tokens.
pub const DEFAULT_JWT_ISSUER: &str = "zanix-auth";

pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis_uri: Option<String>,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u64,
    #[serde(default)]
    pub rate_limit_plans: Option<String>,
    #[serde(default)]
    pub jwk_rotation_cycle: Option<String>,
    #[serde(default = "default_issuer")]
    pub default_jwt_issuer: String,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_uri: None,
            rate_limit_window_seconds: default_rate_limit_window(),
            rate_limit_plans: None,
            jwk_rotation_cycle: None,
            default_jwt_issuer: default_issuer(),
        }
    }
}

fn default_rate_limit_window() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_issuer() -> String {
    DEFAULT_JWT_ISSUER.to_string()
}

/// Issuer expected on verification; overridable for multi-tenant hosts.
pub fn default_jwt_issuer() -> String {
    std::env::var("DEFAULT_JWT_ISSUER").unwrap_or_else(|_| DEFAULT_JWT_ISSUER.to_string())
}

/// Window applied by the guards when none is configured explicitly.
pub fn rate_limit_window_seconds() -> u64 {
    std::env::var("RATE_LIMIT_WINDOW_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS)
}
