//! Where each test task deploys to.

use common::config::StackConfig;
use common::secret::SecretString;

/// Release prefix shared by every skaffold profile.
pub const RELEASE: &str = "web-stack";

/// Port the backend service listens on inside the cluster.
pub const BACKEND_PORT: u16 = 8000;

/// Base URL of the Tilt inner loop when `BASE_URL` is not set.
pub const LOCAL_DEV_BASE_URL: &str = "http://localhost:8000";

/// Admin seeded into CI deployments.
pub const CI_ADMIN_EMAIL: &str = "admin@ci.example.com";
pub const CI_ADMIN_PASSWORD: &str = "ci-admin-password";

/// A skaffold profile deployed into a namespace, with the backend it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    pub profile: &'static str,
    pub namespace: String,
    /// Release suffix baked into the profile's resource names.
    pub tag: &'static str,
}

impl ClusterTarget {
    /// Locally built images in a Kind cluster.
    pub fn local_e2e(config: &StackConfig) -> Self {
        Self {
            profile: "local-kind",
            namespace: format!("{RELEASE}-test-{}", config.namespace_suffix()),
            tag: "test",
        }
    }

    /// CI-built artifacts in a Kind cluster.
    pub fn ci(config: &StackConfig) -> Self {
        Self {
            profile: "ci-kind",
            namespace: format!("{RELEASE}-{}", config.namespace_suffix()),
            tag: "ci",
        }
    }

    /// `web-stack-<tag>-backend-api`; both the deployment and its service.
    pub fn backend(&self) -> String {
        format!("{RELEASE}-{}-backend-api", self.tag)
    }

    pub fn backend_service(&self) -> String {
        format!("svc/{}", self.backend())
    }
}

/// Configured credentials, or the seeded CI admin.
pub fn ci_credentials(config: &StackConfig) -> (String, SecretString) {
    config.e2e_credentials().unwrap_or_else(|| {
        (
            CI_ADMIN_EMAIL.to_string(),
            SecretString::from(CI_ADMIN_PASSWORD),
        )
    })
}

pub fn live_base_url(config: &StackConfig) -> String {
    format!("https://{}", config.live_host)
}
