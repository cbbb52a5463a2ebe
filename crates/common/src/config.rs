//! Stack configuration for devloop tasks.
//!
//! Populated once at startup from the process environment (after the `.env`
//! loader has run) and passed by reference to each task, so nothing
//! downstream reads environment variables on its own.

use crate::secret::SecretString;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Primary registry token variable.
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
/// Fallback registry token variable (common in CI setups).
pub const GH_TOKEN_VAR: &str = "GH_TOKEN";

/// Default live console host.
pub const DEFAULT_LIVE_HOST: &str = "console.example.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

/// Everything devloop reads from the environment.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Registry token from `GITHUB_TOKEN`, falling back to `GH_TOKEN`.
    pub registry_token: Option<SecretString>,
    /// Explicit registry username (`GITHUB_USER`); resolved from the token otherwise.
    pub registry_user: Option<String>,
    /// Override for the local-dev base URL (`BASE_URL`).
    pub base_url: Option<String>,
    /// Websocket subservice base URL (`WS_BASE_URL`).
    pub ws_base_url: Option<String>,
    /// Smoke-test admin email (`E2E_ADMIN_EMAIL`).
    pub e2e_admin_email: Option<String>,
    /// Smoke-test admin password (`E2E_ADMIN_PASSWORD`).
    pub e2e_admin_password: Option<SecretString>,
    /// Running under CI (`CI`).
    pub ci: bool,
    /// Preview environment identifier (`PR_NUMBER`).
    pub pr_number: Option<String>,
    /// Local username (`USER`), used to keep developer namespaces apart.
    pub local_user: String,
    /// Live console host (`DEVLOOP_LIVE_HOST`).
    pub live_host: String,
}

impl StackConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// See [`StackConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing)
    ///
    /// Empty and whitespace-only values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `PR_NUMBER` is not numeric.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let registry_token = get(GITHUB_TOKEN_VAR)
            .or_else(|| get(GH_TOKEN_VAR))
            .map(SecretString::from);

        let ci = get("CI").as_deref().is_some_and(ci_flag);

        let pr_number = get("PR_NUMBER");
        if let Some(pr) = &pr_number {
            if !pr.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidValue {
                    var: "PR_NUMBER".to_string(),
                    reason: format!("expected a number, got '{pr}'"),
                });
            }
        }

        Ok(StackConfig {
            registry_token,
            registry_user: get("GITHUB_USER"),
            base_url: get("BASE_URL"),
            ws_base_url: get("WS_BASE_URL"),
            e2e_admin_email: get("E2E_ADMIN_EMAIL"),
            e2e_admin_password: get("E2E_ADMIN_PASSWORD").map(SecretString::from),
            ci,
            pr_number,
            local_user: get("USER").unwrap_or_else(|| "local".to_string()),
            live_host: get("DEVLOOP_LIVE_HOST").unwrap_or_else(|| DEFAULT_LIVE_HOST.to_string()),
        })
    }

    /// Suffix that keeps test namespaces from different runs apart.
    ///
    /// `pr-<n>` for previews, `ci` on CI, otherwise the local username reduced
    /// to a DNS label.
    #[must_use]
    pub fn namespace_suffix(&self) -> String {
        if let Some(pr) = &self.pr_number {
            return format!("pr-{pr}");
        }
        if self.ci {
            return "ci".to_string();
        }
        dns_label(&self.local_user)
    }

    /// Smoke-test credentials, only when both halves are configured.
    #[must_use]
    pub fn e2e_credentials(&self) -> Option<(String, SecretString)> {
        match (&self.e2e_admin_email, &self.e2e_admin_password) {
            (Some(email), Some(password)) => Some((email.clone(), password.clone())),
            _ => None,
        }
    }
}

/// CI systems set `CI` to anything from `true` to their own name; only an
/// explicit negative turns it off.
fn ci_flag(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no")
}

/// Lowercase, map anything outside `[a-z0-9-]` to `-`, trim dashes, cap at 40.
fn dns_label(raw: &str) -> String {
    let mapped: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(40)
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        "local".to_string()
    } else {
        trimmed.to_string()
    }
}
