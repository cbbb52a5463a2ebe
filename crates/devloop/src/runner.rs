//! Runs the HTTP smoke suite against a deployed stack.
//!
//! The suite is the `env-tests` crate's `smoke` feature. Target details are
//! handed to the child through its environment only; the parent process
//! environment is left alone.

use crate::process::ToolCommand;
use common::error::{DevloopError, Result};
use common::secret::SecretString;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Where the smoke suite should point.
#[derive(Debug, Clone)]
pub struct SmokeTarget {
    pub base_url: String,
    pub ws_base_url: Option<String>,
    pub credentials: Option<(String, SecretString)>,
}

impl SmokeTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ws_base_url: None,
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_ws_base_url(mut self, ws_base_url: Option<String>) -> Self {
        self.ws_base_url = ws_base_url;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<(String, SecretString)>) -> Self {
        self.credentials = credentials;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SmokeRunner {
    program: String,
    repo_root: PathBuf,
}

impl SmokeRunner {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            program: "cargo".to_string(),
            repo_root: repo_root.into(),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn command(&self, target: &SmokeTarget) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program)
            .args([
                "test",
                "-p",
                "env-tests",
                "--features",
                "smoke",
                "--",
                "--nocapture",
                "--test-threads=1",
            ])
            .current_dir(&self.repo_root)
            .env("BASE_URL", target.base_url.as_str());

        if let Some(ws) = &target.ws_base_url {
            cmd = cmd.env("WS_BASE_URL", ws.as_str());
        }
        if let Some((email, password)) = &target.credentials {
            cmd = cmd
                .env("E2E_ADMIN_EMAIL", email.as_str())
                .secret_env("E2E_ADMIN_PASSWORD", password.clone());
        }
        cmd
    }

    /// Run the suite, streaming its output.
    ///
    /// # Errors
    ///
    /// `DevloopError::SmokeSuite` when the suite exits nonzero; spawn
    /// failures pass through unchanged.
    #[instrument(skip_all, fields(base_url = %target.base_url))]
    pub async fn run(&self, target: &SmokeTarget) -> Result<()> {
        info!(
            auth = target.credentials.is_some(),
            "Running smoke tests against {}", target.base_url
        );

        match self.command(target).stream().await {
            Ok(()) => {
                info!("smoke tests passed");
                Ok(())
            }
            Err(DevloopError::Tool { output, .. }) => Err(DevloopError::SmokeSuite(format!(
                "smoke tests against {} failed: {output}",
                target.base_url
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::REDACTED;

    #[test]
    fn test_command_line_and_environment() {
        let target = SmokeTarget::new("http://localhost:41000")
            .with_ws_base_url(Some("http://localhost:41001".to_string()))
            .with_credentials(Some((
                "admin@ci.example.com".to_string(),
                SecretString::from("ci-admin-password"),
            )));

        let cmd = SmokeRunner::new("/repo").command(&target);

        assert_eq!(
            cmd.display(),
            "cargo test -p env-tests --features smoke -- --nocapture --test-threads=1"
        );
        assert_eq!(cmd.env_display("BASE_URL"), Some("http://localhost:41000"));
        assert_eq!(cmd.env_display("WS_BASE_URL"), Some("http://localhost:41001"));
        assert_eq!(cmd.env_display("E2E_ADMIN_EMAIL"), Some("admin@ci.example.com"));
        assert_eq!(cmd.env_display("E2E_ADMIN_PASSWORD"), Some(REDACTED));
    }

    #[test]
    fn test_optional_variables_left_unset() {
        let cmd = SmokeRunner::new("/repo").command(&SmokeTarget::new("http://localhost:8000"));

        assert_eq!(cmd.env_display("WS_BASE_URL"), None);
        assert_eq!(cmd.env_display("E2E_ADMIN_EMAIL"), None);
        assert_eq!(cmd.env_display("E2E_ADMIN_PASSWORD"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_suite_is_smoke_suite_error() {
        let runner = SmokeRunner::new(std::env::temp_dir()).with_program("false");

        let err = runner
            .run(&SmokeTarget::new("http://localhost:8000"))
            .await
            .unwrap_err();

        assert!(matches!(err, DevloopError::SmokeSuite(msg) if msg.contains("http://localhost:8000")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passing_suite() {
        let runner = SmokeRunner::new(std::env::temp_dir()).with_program("true");
        runner.run(&SmokeTarget::new("http://localhost:8000")).await.unwrap();
    }
}
