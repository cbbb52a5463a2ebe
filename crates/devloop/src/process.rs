//! External tool invocation.
//!
//! Every helm/kubectl/skaffold/tilt call goes through [`ToolCommand`], which
//! knows which of its arguments, environment variables and stdin are secret
//! and redacts them when the command line is logged.

use common::error::{DevloopError, Result};
use common::secret::{ExposeSecret, SecretString, REDACTED};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
enum Value {
    Plain(String),
    Secret(SecretString),
}

impl Value {
    fn expose(&self) -> &str {
        match self {
            Value::Plain(v) => v,
            Value::Secret(v) => v.expose_secret(),
        }
    }

    fn display(&self) -> &str {
        match self {
            Value::Plain(v) => v,
            Value::Secret(_) => REDACTED,
        }
    }
}

/// A single external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<Value>,
    envs: Vec<(String, Value)>,
    current_dir: Option<PathBuf>,
    stdin: Option<SecretString>,
}

/// Output of a captured invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout followed by stderr, the way a terminal would have shown them.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, _) => self.stderr.trim_end().to_string(),
        }
    }
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Value::Plain(arg.into()));
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Value::Plain(a.into())));
        self
    }

    /// Argument that must never show up in logs.
    #[must_use]
    pub fn secret_arg(mut self, arg: SecretString) -> Self {
        self.args.push(Value::Secret(arg));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), Value::Plain(value.into())));
        self
    }

    #[must_use]
    pub fn secret_env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.envs.push((key.into(), Value::Secret(value)));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Feed `input` to the child's stdin, then close it.
    #[must_use]
    pub fn stdin(mut self, input: SecretString) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Command line with secrets replaced by `[REDACTED]`.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(Value::display))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Environment variable as it would be logged.
    pub fn env_display(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.display())
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(Value::expose));
        for (key, value) in &self.envs {
            cmd.env(key, value.expose());
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> DevloopError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DevloopError::Configuration(format!(
                "'{}' not found on PATH; install it to run this task",
                self.program
            ))
        } else {
            DevloopError::Io(e)
        }
    }

    async fn feed_stdin(&self, child: &mut Child) -> Result<()> {
        if let (Some(input), Some(mut stdin)) = (&self.stdin, child.stdin.take()) {
            stdin.write_all(input.expose_secret().as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Run with output streamed to the terminal.
    ///
    /// # Errors
    ///
    /// `DevloopError::Tool` on a nonzero exit; the output itself was already
    /// streamed, so the error only carries the exit status.
    pub async fn stream(&self) -> Result<()> {
        info!("   > {}", self.display());

        let mut cmd = self.build();
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        })
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        self.feed_stdin(&mut child).await?;
        let status = child.wait().await?;

        if status.success() {
            Ok(())
        } else {
            Err(DevloopError::Tool {
                tool: self.program.clone(),
                output: format!("{} exited with {status}", self.display()),
            })
        }
    }

    /// Run with stdout and stderr captured, whatever the exit status.
    ///
    /// # Errors
    ///
    /// Only spawn and I/O failures; inspect [`ToolOutput::status`] for the rest.
    pub async fn capture(&self) -> Result<ToolOutput> {
        debug!(command = %self.display(), "capturing");

        let mut cmd = self.build();
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        self.feed_stdin(&mut child).await?;
        let output = child.wait_with_output().await?;

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run captured and turn a nonzero exit into `DevloopError::Tool`.
    ///
    /// # Errors
    ///
    /// `DevloopError::Tool` carrying the combined output verbatim.
    pub async fn run_captured(&self) -> Result<ToolOutput> {
        let output = self.capture().await?;
        if output.success() {
            Ok(output)
        } else {
            error!(command = %self.display(), "exited with {}", output.status);
            Err(DevloopError::Tool {
                tool: self.program.clone(),
                output: output.combined(),
            })
        }
    }

    /// Start a long-running child (a tunnel) that dies with its handle.
    ///
    /// Stdout is discarded, stderr goes to the terminal.
    ///
    /// # Errors
    ///
    /// Spawn failures.
    pub fn spawn_background(&self) -> Result<Child> {
        info!("   > {}", self.display());

        let mut cmd = self.build();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| self.spawn_error(e))
    }
}

/// Whether tool output looks like the registry refused our credentials.
pub fn is_auth_failure(output: &str) -> bool {
    ["denied", "UNAUTHORIZED", "403"]
        .iter()
        .any(|needle| output.contains(needle))
}

/// Fail fast with a clear message when a required tool is not on `PATH`.
///
/// # Errors
///
/// `DevloopError::Configuration` naming the first missing tool.
pub fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        if which::which(tool).is_err() {
            return Err(DevloopError::Configuration(format!(
                "required tool '{tool}' not found on PATH"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_display_redacts_secret_args() {
        let cmd = ToolCommand::new("kubectl")
            .args(["create", "secret"])
            .arg("--docker-username=octocat")
            .secret_arg(SecretString::from("--docker-password=ghp_secret"));

        let shown = cmd.display();
        assert_eq!(
            shown,
            "kubectl create secret --docker-username=octocat [REDACTED]"
        );
        assert!(!shown.contains("ghp_secret"));
    }

    #[test]
    fn test_env_display_redacts_secret_env() {
        let cmd = ToolCommand::new("cargo")
            .env("BASE_URL", "http://localhost:8000")
            .secret_env("E2E_ADMIN_PASSWORD", SecretString::from("pw"));

        assert_eq!(cmd.env_display("BASE_URL"), Some("http://localhost:8000"));
        assert_eq!(cmd.env_display("E2E_ADMIN_PASSWORD"), Some(REDACTED));
        assert_eq!(cmd.env_display("WS_BASE_URL"), None);
    }

    #[test]
    fn test_auth_failure_patterns() {
        assert!(is_auth_failure("Error: failed to authorize: denied"));
        assert!(is_auth_failure("response status code 401: UNAUTHORIZED"));
        assert!(is_auth_failure("unexpected status 403 Forbidden"));
        assert!(!is_auth_failure("Error: chart not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_combined_output_orders_stdout_first() {
        let output = ToolOutput {
            status: exit_status(0),
            stdout: "rendered\n".to_string(),
            stderr: "warning\n".to_string(),
        };
        assert_eq!(output.combined(), "rendered\nwarning");
    }

    #[test]
    fn test_require_tools_reports_missing_tool() {
        let err = require_tools(&["devloop-definitely-not-installed"]).unwrap_err();
        assert!(
            matches!(err, DevloopError::Configuration(msg) if msg.contains("devloop-definitely-not-installed"))
        );
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_feeds_stdin_and_collects_output() {
        let output = ToolCommand::new("sh")
            .args(["-c", "cat; echo oops >&2"])
            .stdin(SecretString::from("token-from-stdin"))
            .capture()
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "token-from-stdin");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captured_surfaces_output_on_failure() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo 'Error: UPGRADE FAILED' >&2; exit 3"])
            .run_captured()
            .await
            .unwrap_err();

        match err {
            DevloopError::Tool { tool, output } => {
                assert_eq!(tool, "sh");
                assert_eq!(output, "Error: UPGRADE FAILED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_reaches_child() {
        let output = ToolCommand::new("sh")
            .args(["-c", "printf %s \"$BASE_URL\""])
            .env("BASE_URL", "http://localhost:1234")
            .run_captured()
            .await
            .unwrap();

        assert_eq!(output.stdout, "http://localhost:1234");
    }

    #[tokio::test]
    async fn test_missing_program_is_configuration_error() {
        let err = ToolCommand::new("devloop-definitely-not-installed")
            .capture()
            .await
            .unwrap_err();

        assert!(matches!(err, DevloopError::Configuration(_)));
    }
}
