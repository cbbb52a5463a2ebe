//! Secret types for registry tokens and test passwords.
//!
//! Re-exports [`secrecy`] so every crate in the workspace agrees on one secret
//! type. `SecretString` implements `Debug` with redaction, so a struct that
//! derives `Debug` and holds a token is safe to hand to `tracing`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credential {
//!     username: Option<String>,
//!     token: SecretString,
//! }
//!
//! let cred = Credential {
//!     username: Some("octocat".to_string()),
//!     token: SecretString::from("ghp_example"),
//! };
//!
//! assert!(!format!("{cred:?}").contains("ghp_example"));
//! assert_eq!(cred.token.expose_secret(), "ghp_example");
//! ```
//!
//! Use `SecretString` for registry tokens (`GITHUB_TOKEN`/`GH_TOKEN`) and
//! smoke-test passwords (`E2E_ADMIN_PASSWORD`). Only call `expose_secret()` at
//! the point the value leaves the process: a child's stdin, an HTTP header,
//! or a child environment variable.

pub use secrecy::{ExposeSecret, SecretString};

/// Placeholder printed wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";
