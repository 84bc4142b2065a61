//! Environment variable helpers
//!
//! ```ignore
//! let acceptors: usize = env_get("SHORELINE_ACCEPTORS", 1);
//! let blend = env_get_bool("SHORELINE_BLEND", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`; unset or unparsable yields `default`
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// `Some` only if `key` is set and parses
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// "1", "true", "yes", "on" (any case) are true, "0", "false", "no",
/// "off" are false. Anything else, or unset, yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
