//! Anonymous session derivation.
//!
//! The identifier is a hash of the client IP and user-agent, so repeat
//! requests from the same client share a rate-limit bucket without storing
//! anything identifying.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::session::Session;

pub const UNKNOWN_IP: &str = "unknown-ip";
pub const INVALID_IP: &str = "invalid-ip";
pub const UNKNOWN_AGENT: &str = "unknown-agent";
pub const ANONYMOUS_ID_PREFIX: &str = "anonymous-";

const MAX_USER_AGENT_LEN: usize = 256;

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").expect("valid ipv4 pattern"));

/// Narrow request-header surface so the core stays framework-free; the guard
/// layer adapts its framework's header map to this.
pub trait HeaderSource {
    fn get_header(&self, name: &str) -> Option<String>;
}

impl HeaderSource for std::collections::HashMap<String, String> {
    fn get_header(&self, name: &str) -> Option<String> {
        self.get(name).cloned().or_else(|| {
            self.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }
}

/// First of `x-forwarded-for` (first CSV element), `cf-connecting-ip`,
/// `x-real-ip`. Values that are not dotted-quad IPv4 collapse to
/// `invalid-ip` before hashing.
pub fn client_ip(headers: &dyn HeaderSource) -> String {
    let candidate = headers
        .get_header("x-forwarded-for")
        .and_then(|raw| raw.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| headers.get_header("cf-connecting-ip"))
        .or_else(|| headers.get_header("x-real-ip"))
        .unwrap_or_else(|| UNKNOWN_IP.to_string());

    if candidate != UNKNOWN_IP && !IPV4_RE.is_match(&candidate) {
        INVALID_IP.to_string()
    } else {
        candidate
    }
}

fn user_agent(headers: &dyn HeaderSource) -> String {
    headers
        .get_header("user-agent")
        .filter(|ua| !ua.is_empty())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect())
        .unwrap_or_else(|| UNKNOWN_AGENT.to_string())
}

/// Stable identifier: `anonymous-<sha1("<ip>-<ua>")>`.
pub fn anonymous_id(headers: &dyn HeaderSource) -> String {
    let ip = client_ip(headers);
    let ua = user_agent(headers);
    let digest = crypto_core::hash::sha1_hex(format!("{ip}-{ua}").as_bytes());
    format!("{ANONYMOUS_ID_PREFIX}{digest}")
}

pub fn generate_anonymous_session(rate_limit: u32, headers: &dyn HeaderSource) -> Session {
    Session::anonymous(anonymous_id(headers), rate_limit)
}
