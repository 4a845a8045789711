//! Environment variable names used by this crate for convenient
//! configuration of sinks from services.
//!
//! These are purely helpers; the logger and the sink types remain
//! decoupled from environment access.

/// New Relic license key sent as the `Api-Key` header.
pub const NEW_RELIC_LICENSE_KEY_ENV: &str = "NEW_RELIC_LICENSE_KEY";

/// Optional New Relic Log API endpoint; the US endpoint if unset.
pub const NEW_RELIC_LOG_ENDPOINT_ENV: &str = "NEW_RELIC_LOG_ENDPOINT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
