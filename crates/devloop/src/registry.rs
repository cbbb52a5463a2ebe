//! Container registry authentication.
//!
//! Turns a GitHub token into (a) a logged-in helm client for private OCI chart
//! dependencies and (b) an image-pull secret inside a namespace. With no token
//! configured the authenticator does not exist at all; callers carry on and
//! let the downstream tool fail if credentials turn out to be required.

use crate::helm::Helm;
use crate::kube::Kubectl;
use common::config::StackConfig;
use common::error::{DevloopError, Result};
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument};

/// Registry that hosts the stack's images and charts.
pub const GHCR_HOST: &str = "ghcr.io";

/// Identity API used to derive a username from a token.
pub const GITHUB_API: &str = "https://api.github.com";

/// Name of the pull secret created in test namespaces.
pub const PULL_SECRET_NAME: &str = "ghcr-pull";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry token plus the username it belongs to.
///
/// The username is resolved lazily and cached for the rest of the run.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
    username: Option<String>,
}

impl Credential {
    pub fn new(token: SecretString, username: Option<String>) -> Self {
        Self { token, username }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    #[serde(default)]
    login: Option<String>,
}

/// Authenticates helm and the cluster against the registry.
#[derive(Debug)]
pub struct RegistryAuthenticator {
    credential: Credential,
    http_client: reqwest::Client,
    identity_api: String,
    registry_host: String,
}

impl RegistryAuthenticator {
    /// Build from configuration; `None` when no token is configured.
    ///
    /// # Errors
    ///
    /// `DevloopError::Configuration` if the HTTP client cannot be built.
    pub fn from_config(config: &StackConfig) -> Result<Option<Self>> {
        let Some(token) = config.registry_token.clone() else {
            info!("no GITHUB_TOKEN/GH_TOKEN set, skipping registry authentication");
            return Ok(None);
        };

        Self::new(Credential::new(token, config.registry_user.clone())).map(Some)
    }

    /// # Errors
    ///
    /// `DevloopError::Configuration` if the HTTP client cannot be built.
    pub fn new(credential: Credential) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("devloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DevloopError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            credential,
            http_client,
            identity_api: GITHUB_API.to_string(),
            registry_host: GHCR_HOST.to_string(),
        })
    }

    /// Point identity lookups somewhere else (tests, GitHub Enterprise).
    #[must_use]
    pub fn with_identity_api(mut self, base_url: impl Into<String>) -> Self {
        self.identity_api = base_url.into();
        self
    }

    /// Username for the token, resolving it from the identity API on first use.
    ///
    /// # Errors
    ///
    /// `DevloopError::Identity` on transport failure, a non-2xx status or a
    /// response without a `login` field.
    pub async fn username(&mut self) -> Result<String> {
        if let Some(username) = &self.credential.username {
            return Ok(username.clone());
        }

        let url = format!("{}/user", self.identity_api.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", self.credential.token.expose_secret()),
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DevloopError::Identity(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DevloopError::Identity(format!(
                "failed to resolve username from token: {status}: {}; set GITHUB_USER",
                body.trim()
            )));
        }

        let identity: IdentityResponse = response
            .json()
            .await
            .map_err(|e| DevloopError::Identity(format!("unreadable identity response: {e}")))?;

        let username = identity
            .login
            .filter(|login| !login.trim().is_empty())
            .ok_or_else(|| {
                DevloopError::Identity(
                    "identity response has no login; set GITHUB_USER".to_string(),
                )
            })?;

        info!(username = %username, "resolved registry username from token");
        self.credential.username = Some(username.clone());
        Ok(username)
    }

    /// Log helm into the registry, piping the token on stdin.
    ///
    /// # Errors
    ///
    /// Identity failures, or `DevloopError::Tool` if helm rejects the login.
    #[instrument(skip_all, fields(registry = %self.registry_host))]
    pub async fn helm_login(&mut self, helm: &Helm) -> Result<()> {
        let username = self.username().await?;
        helm.registry_login(&self.registry_host, &username, self.credential.token.clone())
            .run_captured()
            .await?;
        info!(username = %username, "helm logged into registry");
        Ok(())
    }

    /// Create or update the pull secret in `namespace` and attach it to the
    /// namespace's `default` service account.
    ///
    /// The secret is rendered client-side and applied, so running this twice
    /// is harmless.
    ///
    /// # Errors
    ///
    /// Identity failures, or `DevloopError::Tool` from any kubectl step.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn ensure_pull_secret(&mut self, kubectl: &Kubectl, namespace: &str) -> Result<()> {
        let username = self.username().await?;

        let rendered = kubectl
            .render_registry_secret(
                namespace,
                PULL_SECRET_NAME,
                &self.registry_host,
                &username,
                &self.credential.token,
            )
            .run_captured()
            .await?;

        kubectl
            .apply_stdin(SecretString::from(rendered.stdout))
            .run_captured()
            .await?;

        kubectl
            .patch_service_account(namespace, "default", &pull_secret_patch(PULL_SECRET_NAME))
            .run_captured()
            .await?;

        info!(secret = PULL_SECRET_NAME, "pull secret in place");
        Ok(())
    }
}

/// Strategic-merge patch pointing a service account at `secret`.
pub(crate) fn pull_secret_patch(secret: &str) -> String {
    serde_json::json!({ "imagePullSecrets": [{ "name": secret }] }).to_string()
}
