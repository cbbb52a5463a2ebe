//! The task bodies behind each CLI subcommand.
//!
//! Tool presence is checked by [`crate::run_task`] before any of these run.

use crate::deploy::{Deployer, Skaffold};
use crate::helm::{Chart, Helm};
use crate::kube::Kubectl;
use crate::port_forward::{PortForwardSession, TunnelSpec};
use crate::process::ToolCommand;
use crate::registry::RegistryAuthenticator;
use crate::runner::{SmokeRunner, SmokeTarget};
use crate::targets::{
    ci_credentials, live_base_url, ClusterTarget, BACKEND_PORT, LOCAL_DEV_BASE_URL, RELEASE,
};
use crate::values::{ValuesValidator, ENVS_DIR};
use common::config::StackConfig;
use common::error::{DevloopError, Result};
use common::secret::SecretString;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Chart rendered by `validate:envs`, relative to the repo root.
pub const CHART_DIR: &str = "charts/app";

/// Everything a task needs, resolved once at startup.
#[derive(Debug)]
pub struct TaskContext {
    pub config: StackConfig,
    pub repo_root: PathBuf,
    pub dotenv_path: PathBuf,
    pub kubectl: Kubectl,
    pub helm: Helm,
    pub skaffold: Skaffold,
}

impl TaskContext {
    pub fn new(config: StackConfig, repo_root: PathBuf, dotenv_path: PathBuf) -> Self {
        Self {
            config,
            repo_root,
            dotenv_path,
            kubectl: Kubectl::new(),
            helm: Helm::new(),
            skaffold: Skaffold::new(),
        }
    }

    fn deployer(&self) -> Deployer {
        Deployer::new(self.skaffold.clone(), self.kubectl.clone())
    }

    fn runner(&self) -> SmokeRunner {
        SmokeRunner::new(&self.repo_root)
    }
}

/// `tilt up`.
///
/// # Errors
///
/// Tilt exiting nonzero.
pub async fn dev(ctx: &TaskContext) -> Result<()> {
    info!("Starting Tilt (inner loop)");
    ToolCommand::new("tilt")
        .arg("up")
        .current_dir(&ctx.repo_root)
        .stream()
        .await
}

/// Remove the local E2E namespace, then `tilt down`.
///
/// # Errors
///
/// `tilt down` failing; the namespace deletion is best effort.
pub async fn clean(ctx: &TaskContext) -> Result<()> {
    info!("Cleaning up");

    let namespace = ClusterTarget::local_e2e(&ctx.config).namespace;
    if let Err(e) = ctx.kubectl.delete_namespace(&namespace).run_captured().await {
        warn!("could not delete namespace {namespace}: {e}");
    }

    ToolCommand::new("tilt")
        .arg("down")
        .current_dir(&ctx.repo_root)
        .stream()
        .await
}

/// Render every environment's values against the chart, offline.
///
/// # Errors
///
/// `DevloopError::Configuration` without a cloud; otherwise whatever
/// [`ValuesValidator::validate`] reports.
#[instrument(skip_all)]
pub async fn validate_envs(ctx: &TaskContext, cloud: Option<&str>) -> Result<()> {
    let cloud = cloud.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
        DevloopError::Configuration(
            "missing cloud argument; usage: devloop validate:envs <cloud> (e.g. `devloop validate:envs aws`)"
                .to_string(),
        )
    })?;
    info!("Validating environment configurations for cloud {cloud}");

    if let Some(mut auth) = RegistryAuthenticator::from_config(&ctx.config)? {
        if let Err(e) = auth.helm_login(&ctx.helm).await {
            warn!("registry login failed, continuing without it: {e}");
        }
    }

    let validator = ValuesValidator::new(
        ctx.helm.clone(),
        Chart::new(RELEASE, ctx.repo_root.join(CHART_DIR)),
        ctx.repo_root.join(ENVS_DIR),
        ctx.dotenv_path.clone(),
    );
    validator.validate(cloud).await?;
    Ok(())
}

/// Smoke tests against the running Tilt environment.
///
/// # Errors
///
/// Smoke suite failure.
pub async fn test_localdev(ctx: &TaskContext) -> Result<()> {
    info!("[E2E] Target: local dev (Tilt)");
    let base_url = ctx
        .config
        .base_url
        .clone()
        .unwrap_or_else(|| LOCAL_DEV_BASE_URL.to_string());

    let target = SmokeTarget::new(base_url)
        .with_ws_base_url(ctx.config.ws_base_url.clone())
        .with_credentials(ctx.config.e2e_credentials());
    ctx.runner().run(&target).await
}

/// Locally built images in Kind: deploy, wait, tunnel, test.
///
/// # Errors
///
/// The first failing step.
#[instrument(skip_all)]
pub async fn test_local_e2e(ctx: &TaskContext) -> Result<()> {
    info!("[E2E] Target: Kind local");

    let target = ClusterTarget::local_e2e(&ctx.config);
    ctx.kubectl.ensure_namespace(&target.namespace).await?;
    ctx.deployer()
        .deploy_and_wait(target.profile, &target.namespace, &target.backend())
        .await?;

    let credentials = ctx.config.e2e_credentials();
    tunnel_and_test(ctx, &target, credentials).await
}

/// CI artifacts in Kind, into a freshly recreated namespace.
///
/// # Errors
///
/// The first failing step.
#[instrument(skip_all)]
pub async fn test_ci(ctx: &TaskContext) -> Result<()> {
    info!("[E2E] Target: Kind CI");

    let target = ClusterTarget::ci(&ctx.config);
    let deployer = ctx.deployer();

    deployer.delete_namespace_and_wait(&target.namespace).await?;
    ctx.kubectl.ensure_namespace(&target.namespace).await?;

    if let Some(mut auth) = RegistryAuthenticator::from_config(&ctx.config)? {
        auth.ensure_pull_secret(&ctx.kubectl, &target.namespace).await?;
    }

    deployer
        .deploy_and_wait(target.profile, &target.namespace, &target.backend())
        .await?;

    tunnel_and_test(ctx, &target, Some(ci_credentials(&ctx.config))).await
}

/// Smoke tests against the live console.
///
/// # Errors
///
/// Smoke suite failure.
pub async fn test_live(ctx: &TaskContext) -> Result<()> {
    info!("[E2E] Target: live");
    let target = SmokeTarget::new(live_base_url(&ctx.config))
        .with_ws_base_url(ctx.config.ws_base_url.clone())
        .with_credentials(ctx.config.e2e_credentials());
    ctx.runner().run(&target).await
}

async fn tunnel_and_test(
    ctx: &TaskContext,
    target: &ClusterTarget,
    credentials: Option<(String, SecretString)>,
) -> Result<()> {
    let session = PortForwardSession::start(
        &ctx.kubectl,
        TunnelSpec::new(&target.namespace, target.backend_service(), BACKEND_PORT),
    )
    .await?;

    let smoke = SmokeTarget::new(session.base_url()).with_credentials(credentials);
    let result = ctx.runner().run(&smoke).await;
    session.stop().await;
    result
}
