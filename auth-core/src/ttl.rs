//! TTL string parsing shared by token issuance and key rotation.

use error_types::{codes, AuthError, AuthResult};

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse a TTL given either as bare seconds (`"60"`) or as a duration string
/// (`"30d"`, `"12h"`, `"1mo"`). Months are 30 days, years 365.
pub fn parse_ttl(raw: &str) -> AuthResult<i64> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<i64>() {
        return Ok(seconds);
    }

    let unit_start = raw
        .find(|c: char| !c.is_ascii_digit())
        .filter(|&idx| idx > 0)
        .ok_or_else(|| invalid(raw))?;
    let (value, unit) = raw.split_at(unit_start);
    let value: i64 = value.parse().map_err(|_| invalid(raw))?;

    let factor = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        "mo" => 2_592_000,
        "y" => 31_536_000,
        _ => return Err(invalid(raw)),
    };
    Ok(value * factor)
}

fn invalid(raw: &str) -> AuthError {
    AuthError::internal(
        codes::INVALID_EXPIRATION,
        format!("`{raw}` is not a valid TTL."),
    )
}
