//! kubectl invocations.

use crate::process::{ToolCommand, ToolOutput};
use common::error::{DevloopError, Result};
use common::secret::{ExposeSecret, SecretString};
use std::time::Duration;

/// Builds kubectl commands.
///
/// `program` and `leading_args` exist so tests can stand in a script for the
/// real binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    leading_args: Vec<String>,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of asking whether a namespace exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceState {
    Present,
    Absent,
    /// kubectl failed for another reason; carries its output.
    Unknown(String),
}

impl Kubectl {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("kubectl", Vec::new())
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Base command; everything else appends to it.
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).args(self.leading_args.iter().cloned())
    }

    /// Delete without waiting for finalizers; callers poll for completion.
    pub fn delete_namespace(&self, namespace: &str) -> ToolCommand {
        self.command().args([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
            "--wait=false",
        ])
    }

    pub fn get_namespace(&self, namespace: &str) -> ToolCommand {
        self.command()
            .args(["get", "namespace", namespace, "-o", "name"])
    }

    /// Check namespace existence.
    ///
    /// # Errors
    ///
    /// Spawn failures only; kubectl errors land in `NamespaceState::Unknown`.
    pub async fn namespace_state(&self, namespace: &str) -> Result<NamespaceState> {
        let output = self.get_namespace(namespace).capture().await?;
        Ok(classify_namespace_lookup(&output))
    }

    pub fn wait_available(&self, namespace: &str, deployment: &str, timeout: Duration) -> ToolCommand {
        self.command().args([
            "wait".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--for=condition=available".to_string(),
            format!("deployment/{deployment}"),
            format!("--timeout={}s", timeout.as_secs()),
        ])
    }

    pub fn port_forward(
        &self,
        namespace: &str,
        resource: &str,
        local_port: u16,
        target_port: u16,
    ) -> ToolCommand {
        self.command().args([
            "port-forward".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            resource.to_string(),
            format!("{local_port}:{target_port}"),
        ])
    }

    /// Render a docker-registry secret client-side without touching the cluster.
    pub fn render_registry_secret(
        &self,
        namespace: &str,
        name: &str,
        server: &str,
        username: &str,
        password: &SecretString,
    ) -> ToolCommand {
        self.command()
            .args([
                "create".to_string(),
                "secret".to_string(),
                "docker-registry".to_string(),
                name.to_string(),
                "--namespace".to_string(),
                namespace.to_string(),
                format!("--docker-server={server}"),
                format!("--docker-username={username}"),
            ])
            .secret_arg(SecretString::from(format!(
                "--docker-password={}",
                password.expose_secret()
            )))
            .args(["--dry-run=client", "-o", "yaml"])
    }

    /// `kubectl apply -f -` fed with `manifest`.
    pub fn apply_stdin(&self, manifest: SecretString) -> ToolCommand {
        self.command().args(["apply", "-f", "-"]).stdin(manifest)
    }

    pub fn patch_service_account(&self, namespace: &str, account: &str, patch: &str) -> ToolCommand {
        self.command().args([
            "patch",
            "serviceaccount",
            account,
            "--namespace",
            namespace,
            "-p",
            patch,
        ])
    }

    /// Create the namespace if it does not exist yet.
    ///
    /// # Errors
    ///
    /// `DevloopError::Tool` when either step fails.
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let rendered = self
            .command()
            .args(["create", "namespace", namespace, "--dry-run=client", "-o", "yaml"])
            .run_captured()
            .await?;
        self.apply_stdin(SecretString::from(rendered.stdout))
            .run_captured()
            .await?;
        Ok(())
    }
}

fn classify_namespace_lookup(output: &ToolOutput) -> NamespaceState {
    if output.success() {
        NamespaceState::Present
    } else if output.stderr.contains("NotFound") || output.stderr.contains("not found") {
        NamespaceState::Absent
    } else {
        NamespaceState::Unknown(output.combined())
    }
}

/// Error for a deployment that never reported available.
pub(crate) fn availability_timeout(namespace: &str, deployment: &str, timeout: Duration, output: &str) -> DevloopError {
    DevloopError::Timeout(format!(
        "deploy succeeded but deployment/{deployment} in namespace {namespace} \
         did not become available within {}s:\n{output}",
        timeout.as_secs()
    ))
}
