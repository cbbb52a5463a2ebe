//! Test fixtures for talking to the deployed API.

pub mod auth_client;
pub mod system_client;

pub use auth_client::AuthClient;
pub use system_client::SystemClient;

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length for error body in error messages.
const MAX_ERROR_BODY_LEN: usize = 256;

/// Regex pattern for JWT tokens (header.payload.signature).
static JWT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]*)?").unwrap()
});

/// Regex pattern for Bearer tokens in text.
static BEARER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").unwrap());

/// Strip tokens from a response body before it lands in a failure message,
/// then cap its length.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    let sanitized = BEARER_PATTERN.replace_all(body, "[BEARER_REDACTED]");
    let sanitized = JWT_PATTERN.replace_all(&sanitized, "[JWT_REDACTED]");

    if sanitized.len() > MAX_ERROR_BODY_LEN {
        let cut = (0..=MAX_ERROR_BODY_LEN)
            .rev()
            .find(|i| sanitized.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...[truncated]", &sanitized[..cut])
    } else {
        sanitized.into_owned()
    }
}
