//! Middleware module - API-key authentication and global rate limiting

pub mod auth;
pub mod rate_limit;

pub use auth::AuthLayer;
pub use rate_limit::RateLimitLayer;

/// Paths reachable without credentials or rate limiting
pub(crate) fn is_public_path(path: &str) -> bool {
    path == "/health"
}
