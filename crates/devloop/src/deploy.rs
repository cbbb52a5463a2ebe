//! Deploying the stack into a cluster and waiting for it to converge.

use crate::kube::{availability_timeout, Kubectl, NamespaceState};
use crate::process::ToolCommand;
use common::error::{DevloopError, Result};
use common::poll::{poll_until, PollVerdict, WaitCategory};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Bound on a deployment reporting `Available` after skaffold returns.
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds skaffold commands.
#[derive(Debug, Clone)]
pub struct Skaffold {
    program: String,
    leading_args: Vec<String>,
}

impl Default for Skaffold {
    fn default() -> Self {
        Self::new()
    }
}

impl Skaffold {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("skaffold", Vec::new())
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn run(&self, profile: &str, namespace: &str) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(self.leading_args.iter().cloned())
            .args(["run", "-p", profile, "--namespace", namespace])
    }
}

/// Drives skaffold and kubectl for one deployment.
#[derive(Debug, Clone, Default)]
pub struct Deployer {
    skaffold: Skaffold,
    kubectl: Kubectl,
    availability_timeout: Option<Duration>,
}

impl Deployer {
    pub fn new(skaffold: Skaffold, kubectl: Kubectl) -> Self {
        Self {
            skaffold,
            kubectl,
            availability_timeout: None,
        }
    }

    #[must_use]
    pub fn with_availability_timeout(mut self, timeout: Duration) -> Self {
        self.availability_timeout = Some(timeout);
        self
    }

    /// `skaffold run`, output streamed live.
    ///
    /// # Errors
    ///
    /// `DevloopError::Tool` when skaffold exits nonzero.
    #[instrument(skip_all, fields(profile = %profile, namespace = %namespace))]
    pub async fn deploy(&self, profile: &str, namespace: &str) -> Result<()> {
        info!("Deploying with skaffold profile {profile} into namespace {namespace}");
        self.skaffold.run(profile, namespace).stream().await
    }

    /// Block until `deployment` reports `Available`.
    ///
    /// # Errors
    ///
    /// `DevloopError::Timeout` when kubectl gives up, kept distinct from a
    /// failed deploy so the operator knows the rollout itself went through.
    #[instrument(skip_all, fields(namespace = %namespace, deployment = %deployment))]
    pub async fn wait_for_available(&self, namespace: &str, deployment: &str) -> Result<()> {
        let timeout = self.availability_timeout.unwrap_or(AVAILABILITY_TIMEOUT);
        info!("Waiting up to {}s for deployment/{deployment}", timeout.as_secs());

        let output = self
            .kubectl
            .wait_available(namespace, deployment, timeout)
            .capture()
            .await?;

        if output.success() {
            info!("deployment/{deployment} is available");
            Ok(())
        } else {
            Err(availability_timeout(
                namespace,
                deployment,
                timeout,
                &output.combined(),
            ))
        }
    }

    /// Deploy, then wait for availability.
    ///
    /// # Errors
    ///
    /// See [`Self::deploy`] and [`Self::wait_for_available`].
    pub async fn deploy_and_wait(&self, profile: &str, namespace: &str, deployment: &str) -> Result<()> {
        self.deploy(profile, namespace).await?;
        self.wait_for_available(namespace, deployment).await
    }

    /// Start a namespace deletion and poll until it is gone.
    ///
    /// # Errors
    ///
    /// `DevloopError::Tool` if the delete is refused, `DevloopError::Timeout`
    /// if the namespace is still there after the deletion bound.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn delete_namespace_and_wait(&self, namespace: &str) -> Result<()> {
        info!("Deleting namespace {namespace}");
        self.kubectl.delete_namespace(namespace).run_captured().await?;

        let what = format!("deletion of namespace {namespace}");
        poll_until(&what, WaitCategory::NamespaceDeletion.policy(), |attempt| {
            let kubectl = self.kubectl.clone();
            let namespace = namespace.to_string();
            async move {
                match kubectl.namespace_state(&namespace).await {
                    Ok(NamespaceState::Absent) => PollVerdict::Ready,
                    Ok(NamespaceState::Present) => PollVerdict::Pending,
                    Ok(NamespaceState::Unknown(output)) => {
                        warn!(attempt, "namespace lookup failed: {output}");
                        PollVerdict::Pending
                    }
                    Err(e) => PollVerdict::Abort(e.to_string()),
                }
            }
        })
        .await
        .map_err(DevloopError::from)?;

        info!("namespace {namespace} is gone");
        Ok(())
    }
}
