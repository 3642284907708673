//! Permission scope validation.
//!
//! The contract is any-of: a single overlapping permission grants access, and
//! the `*` wildcard in the held set matches everything.

use std::collections::HashSet;

pub const WILDCARD: &str = "*";

/// Ok when `required` is empty, `held` carries the wildcard, or the two sets
/// intersect. The error value is the reason handed back to clients.
pub fn validate(required: &[String], held: &[String]) -> Result<(), String> {
    if required.is_empty() {
        return Ok(());
    }
    if held.is_empty() {
        return Err(insufficient(required));
    }
    if held.iter().any(|permission| permission == WILDCARD) {
        return Ok(());
    }

    let held: HashSet<&str> = held.iter().map(String::as_str).collect();
    if required.iter().any(|needed| held.contains(needed.as_str())) {
        Ok(())
    } else {
        Err(insufficient(required))
    }
}

fn insufficient(required: &[String]) -> String {
    format!(
        "Insufficient permissions. Requires any of [{}].",
        required.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_required_always_passes() {
        assert!(validate(&[], &perms(&["read"])).is_ok());
        assert!(validate(&[], &[]).is_ok());
    }

    #[test]
    fn test_empty_held_fails() {
        let err = validate(&perms(&["read", "write"]), &[]).unwrap_err();
        assert_eq!(err, "Insufficient permissions. Requires any of [read, write].");
    }

    #[test]
    fn test_wildcard_passes() {
        assert!(validate(&perms(&["admin"]), &perms(&["*"])).is_ok());
    }

    #[test]
    fn test_any_overlap_passes() {
        assert!(validate(&perms(&["read", "write"]), &perms(&["write"])).is_ok());
        assert!(validate(&perms(&["read"]), &perms(&["read", "extra"])).is_ok());
    }

    #[test]
    fn test_disjoint_fails() {
        assert!(validate(&perms(&["read"]), &perms(&["write"])).is_err());
    }
}
