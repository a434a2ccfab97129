//! Middleware module - API key authentication and rate limiting

pub mod auth;
pub mod rate_limit;

pub use auth::AuthLayer;
pub use rate_limit::RateLimitLayer;

/// Operational endpoints that bypass authentication and rate limiting
pub(crate) fn is_operational_path(path: &str) -> bool {
    matches!(path, "/" | "/health" | "/stats")
}
