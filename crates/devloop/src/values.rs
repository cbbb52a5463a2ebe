//! Environment values discovery and offline validation.
//!
//! Layout under the repository root:
//!
//! ```text
//! envs/
//!   aws.yaml              cloud selector (top level, never an environment)
//!   live/
//!     default.yaml        optional shared layer for this directory
//!     prod.yaml           environment
//!   preview/
//!     values.yaml         environment
//! ```
//!
//! Each environment renders with `cloud → same-directory default → env`,
//! which matches helm's last-wins merge of repeated `--values` flags. Nothing
//! here talks to a cluster.

use crate::helm::{Chart, Helm};
use crate::process::is_auth_failure;
use common::error::{DevloopError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument};
use walkdir::WalkDir;

/// Directory holding the values layers, relative to the repo root.
pub const ENVS_DIR: &str = "envs";

const DEFAULT_LAYER_NAMES: [&str; 2] = ["default.yaml", "default.yml"];

/// Role of a file in an environment's layer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Cloud,
    Default,
    Environment,
}

/// One values file in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesLayer {
    pub path: PathBuf,
    pub kind: LayerKind,
}

/// The ordered layers for one environment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesPlan {
    pub environment: PathBuf,
    pub layers: Vec<ValuesLayer>,
}

impl ValuesPlan {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.layers.iter().map(|layer| layer.path.as_path())
    }
}

impl fmt::Display for ValuesPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<String> = self
            .layers
            .iter()
            .map(|layer| layer.path.display().to_string())
            .collect();
        write!(f, "{}", order.join(" -> "))
    }
}

/// A plan that failed to render.
#[derive(Debug)]
pub struct RenderFailure {
    pub plan: ValuesPlan,
    pub output: String,
}

/// Outcome of rendering every discovered environment.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub passed: Vec<PathBuf>,
    pub failed: Vec<RenderFailure>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Everything an operator needs to reproduce each failure.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|failure| {
                format!(
                    "{}\n  values order: {}\n  helm output:\n{}",
                    failure.plan.environment.display(),
                    failure.plan,
                    indent(&failure.output, "    ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate `envs/<cloud>.yaml`.
///
/// # Errors
///
/// `DevloopError::Configuration` naming the expected path when it is missing.
pub fn cloud_file(envs_dir: &Path, cloud: &str) -> Result<PathBuf> {
    if cloud.trim().is_empty() || cloud.contains(['/', '\\']) {
        return Err(DevloopError::Configuration(format!(
            "invalid cloud name '{cloud}'; expected a file stem under {}",
            envs_dir.display()
        )));
    }

    let path = envs_dir.join(format!("{cloud}.yaml"));
    if path.is_file() {
        Ok(path)
    } else {
        Err(DevloopError::Configuration(format!(
            "cloud values file not found: expected {}",
            path.display()
        )))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

fn is_default_layer(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| DEFAULT_LAYER_NAMES.contains(&name))
}

/// Every environment file below `envs_dir`, sorted by path.
///
/// Top-level files are cloud selectors and `default.yaml`/`default.yml` are
/// shared layers, so neither counts.
///
/// # Errors
///
/// `DevloopError::Io` if the tree cannot be walked.
pub fn discover_environment_files(envs_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(envs_dir).min_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            DevloopError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("failed to walk {}: {e}", envs_dir.display()),
            ))
        })?;

        let path = entry.path();
        if entry.file_type().is_file() && is_yaml(path) && !is_default_layer(path) {
            found.push(path.to_path_buf());
        }
    }

    found.sort();
    Ok(found)
}

/// Layer list for one environment file.
pub fn plan_layers(cloud_file: &Path, environment: &Path) -> ValuesPlan {
    let mut layers = vec![ValuesLayer {
        path: cloud_file.to_path_buf(),
        kind: LayerKind::Cloud,
    }];

    if let Some(dir) = environment.parent() {
        if let Some(default) = DEFAULT_LAYER_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
        {
            layers.push(ValuesLayer {
                path: default,
                kind: LayerKind::Default,
            });
        }
    }

    layers.push(ValuesLayer {
        path: environment.to_path_buf(),
        kind: LayerKind::Environment,
    });

    ValuesPlan {
        environment: environment.to_path_buf(),
        layers,
    }
}

/// Plans for every environment under `envs_dir` against `cloud`.
///
/// # Errors
///
/// `DevloopError::Configuration` when the cloud file is missing or no
/// environment files exist; an empty tree is a misconfiguration, not a pass.
pub fn plan_all(envs_dir: &Path, cloud: &str) -> Result<Vec<ValuesPlan>> {
    let cloud = cloud_file(envs_dir, cloud)?;
    let environments = discover_environment_files(envs_dir)?;

    if environments.is_empty() {
        return Err(DevloopError::Configuration(format!(
            "no environment values files found under {} (expected {}/<env>/*.yaml)",
            envs_dir.display(),
            envs_dir.display()
        )));
    }

    Ok(environments
        .iter()
        .map(|environment| plan_layers(&cloud, environment))
        .collect())
}

/// Remediation text for a registry refusal during `helm dependency build`.
pub fn registry_auth_remediation(dotenv_path: &Path, output: &str) -> String {
    format!(
        "helm dependency build failed due to registry auth.\n\n\
         Fix (local dev): create a gitignored .env with:\n  \
         GITHUB_TOKEN=<token with read:packages>\n\
         (optional) GITHUB_USER=<github username>\n\n\
         Then re-run: devloop validate:envs <cloud>\n\n\
         .env path: {}\n\n\
         helm output:\n{output}",
        dotenv_path.display()
    )
}

/// Offline renderer for every environment.
#[derive(Debug, Clone)]
pub struct ValuesValidator {
    helm: Helm,
    chart: Chart,
    envs_dir: PathBuf,
    dotenv_path: PathBuf,
}

impl ValuesValidator {
    pub fn new(helm: Helm, chart: Chart, envs_dir: PathBuf, dotenv_path: PathBuf) -> Self {
        Self {
            helm,
            chart,
            envs_dir,
            dotenv_path,
        }
    }

    /// `helm dependency build`, with registry refusals turned into remediation.
    ///
    /// # Errors
    ///
    /// `DevloopError::RegistryAuth` for auth-looking failures, otherwise
    /// `DevloopError::Tool` with helm's output.
    pub async fn build_dependencies(&self) -> Result<()> {
        let output = self.helm.dependency_build(&self.chart.path).capture().await?;
        if output.success() {
            return Ok(());
        }

        let combined = output.combined();
        if is_auth_failure(&combined) {
            let dotenv = std::path::absolute(&self.dotenv_path)
                .unwrap_or_else(|_| self.dotenv_path.clone());
            Err(DevloopError::RegistryAuth(registry_auth_remediation(
                &dotenv, &combined,
            )))
        } else {
            Err(DevloopError::Tool {
                tool: "helm".to_string(),
                output: combined,
            })
        }
    }

    /// Render every plan, collecting all failures before reporting.
    ///
    /// # Errors
    ///
    /// Configuration errors from [`plan_all`] and spawn failures.
    #[instrument(skip_all, fields(cloud = %cloud))]
    pub async fn render_all(&self, cloud: &str) -> Result<ValidationReport> {
        let plans = plan_all(&self.envs_dir, cloud)?;
        let mut report = ValidationReport::default();

        for plan in plans {
            info!("   > Checking {} ({})", plan.environment.display(), plan);
            let output = self.helm.template(&self.chart, plan.paths()).capture().await?;

            if output.success() {
                info!("     valid: {}", plan.environment.display());
                report.passed.push(plan.environment);
            } else {
                error!("     FAILED: {}", plan.environment.display());
                report.failed.push(RenderFailure {
                    plan,
                    output: output.combined(),
                });
            }
        }

        Ok(report)
    }

    /// Build dependencies, render everything, fail if anything failed.
    ///
    /// # Errors
    ///
    /// See [`Self::build_dependencies`] and [`Self::render_all`]; render
    /// failures become `DevloopError::Tool` listing each environment.
    pub async fn validate(&self, cloud: &str) -> Result<ValidationReport> {
        info!("   > helm dependency build {}", self.chart.path.display());
        self.build_dependencies().await?;

        let report = self.render_all(cloud).await?;
        if report.is_success() {
            info!(environments = report.passed.len(), "all environments render");
            Ok(report)
        } else {
            Err(DevloopError::Tool {
                tool: "helm".to_string(),
                output: format!(
                    "{} of {} environments failed to render:\n\n{}",
                    report.failed.len(),
                    report.failed.len() + report.passed.len(),
                    report.failure_summary()
                ),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "replicas: 1\n").unwrap();
        path
    }

    fn envs_tree() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let envs = dir.path().join(ENVS_DIR);
        touch(&envs, "aws.yaml");
        touch(&envs, "gcp.yaml");
        touch(&envs, "default.yaml");
        touch(&envs, "live/default.yaml");
        touch(&envs, "live/prod.yaml");
        touch(&envs, "live/canary.yml");
        touch(&envs, "preview/values.yaml");
        touch(&envs, "preview/notes.txt");
        touch(&envs, "preview/nested/deep.yaml");
        (dir, envs)
    }

    #[test]
    fn test_cloud_file_found() {
        let (_dir, envs) = envs_tree();
        assert_eq!(cloud_file(&envs, "aws").unwrap(), envs.join("aws.yaml"));
    }

    #[test]
    fn test_cloud_file_missing_names_expected_path() {
        let (_dir, envs) = envs_tree();
        let err = cloud_file(&envs, "azure").unwrap_err();
        let expected = envs.join("azure.yaml");
        assert!(
            matches!(&err, DevloopError::Configuration(msg) if msg.contains(&expected.display().to_string())),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_cloud_name_cannot_escape_envs_dir() {
        let (_dir, envs) = envs_tree();
        assert!(matches!(
            cloud_file(&envs, "../secrets"),
            Err(DevloopError::Configuration(_))
        ));
    }

    #[test]
    fn test_discovery_skips_top_level_defaults_and_non_yaml() {
        let (_dir, envs) = envs_tree();

        let found = discover_environment_files(&envs).unwrap();

        assert_eq!(
            found,
            vec![
                envs.join("live/canary.yml"),
                envs.join("live/prod.yaml"),
                envs.join("preview/nested/deep.yaml"),
                envs.join("preview/values.yaml"),
            ]
        );
    }

    #[test]
    fn test_layers_cloud_then_default_then_environment() {
        let (_dir, envs) = envs_tree();
        let plan = plan_layers(&envs.join("aws.yaml"), &envs.join("live/prod.yaml"));

        let kinds: Vec<LayerKind> = plan.layers.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LayerKind::Cloud, LayerKind::Default, LayerKind::Environment]
        );
        assert_eq!(plan.layers[0].path, envs.join("aws.yaml"));
        assert_eq!(plan.layers[1].path, envs.join("live/default.yaml"));
        assert_eq!(plan.layers[2].path, envs.join("live/prod.yaml"));
    }

    #[test]
    fn test_default_layer_only_from_same_directory() {
        let (_dir, envs) = envs_tree();

        // envs/default.yaml exists but lives above preview/, so it is not used.
        let plan = plan_layers(&envs.join("aws.yaml"), &envs.join("preview/values.yaml"));

        assert_eq!(plan.layers.len(), 2);
        assert_eq!(plan.layers[0].kind, LayerKind::Cloud);
        assert_eq!(plan.layers[1].kind, LayerKind::Environment);
    }

    #[test]
    fn test_default_yml_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let envs = dir.path().join(ENVS_DIR);
        touch(&envs, "aws.yaml");
        touch(&envs, "staging/default.yml");
        let env = touch(&envs, "staging/eu.yaml");

        let plan = plan_layers(&envs.join("aws.yaml"), &env);

        assert_eq!(plan.layers[1].path, envs.join("staging/default.yml"));
    }

    #[test]
    fn test_plan_all_fails_on_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let envs = dir.path().join(ENVS_DIR);
        touch(&envs, "aws.yaml");
        touch(&envs, "live/default.yaml");

        let err = plan_all(&envs, "aws").unwrap_err();

        let msg = err.to_string();
        assert!(!msg.is_empty());
        assert!(msg.contains("no environment values files"));
    }

    #[test]
    fn test_plan_all_is_deterministic() {
        let (_dir, envs) = envs_tree();

        let first = plan_all(&envs, "aws").unwrap();
        let second = plan_all(&envs, "aws").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|plan| plan.layers[0].kind == LayerKind::Cloud));
        assert!(first
            .iter()
            .all(|plan| plan.layers.last().unwrap().kind == LayerKind::Environment));
    }

    #[test]
    fn test_plan_display_shows_order() {
        let plan = ValuesPlan {
            environment: PathBuf::from("envs/live/prod.yaml"),
            layers: vec![
                ValuesLayer {
                    path: PathBuf::from("envs/aws.yaml"),
                    kind: LayerKind::Cloud,
                },
                ValuesLayer {
                    path: PathBuf::from("envs/live/prod.yaml"),
                    kind: LayerKind::Environment,
                },
            ],
        };
        assert_eq!(plan.to_string(), "envs/aws.yaml -> envs/live/prod.yaml");
    }

    #[test]
    fn test_remediation_names_env_keys() {
        let msg = registry_auth_remediation(Path::new("/repo/.env"), "403 Forbidden");
        assert!(msg.contains("GITHUB_TOKEN=<token with read:packages>"));
        assert!(msg.contains("GITHUB_USER"));
        assert!(msg.contains("/repo/.env"));
        assert!(msg.contains("403 Forbidden"));
    }

    #[cfg(unix)]
    fn fake_helm(dir: &Path, script: &str) -> Helm {
        let path = dir.join("helm.sh");
        fs::write(&path, script).unwrap();
        Helm::with_program("sh", vec![path.display().to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dependency_build_auth_failure_gets_remediation() {
        let (dir, envs) = envs_tree();
        let helm = fake_helm(
            dir.path(),
            "echo 'Error: failed to fetch: 403 Forbidden' >&2\nexit 1\n",
        );
        let validator = ValuesValidator::new(
            helm,
            Chart::new("web-stack", dir.path().join("charts/app")),
            envs,
            dir.path().join(".env"),
        );

        let err = validator.build_dependencies().await.unwrap_err();

        assert!(
            matches!(&err, DevloopError::RegistryAuth(msg) if msg.contains("GITHUB_TOKEN") && msg.contains("403 Forbidden")),
            "unexpected error: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dependency_build_generic_failure() {
        let (dir, envs) = envs_tree();
        let helm = fake_helm(dir.path(), "echo 'Error: Chart.yaml missing' >&2\nexit 1\n");
        let validator = ValuesValidator::new(
            helm,
            Chart::new("web-stack", dir.path().join("charts/app")),
            envs,
            dir.path().join(".env"),
        );

        let err = validator.build_dependencies().await.unwrap_err();

        assert!(matches!(err, DevloopError::Tool { output, .. } if output.contains("Chart.yaml missing")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validate_reports_every_failing_environment() {
        let (dir, envs) = envs_tree();
        // Fails any render whose layers include live/prod.yaml or preview/values.yaml.
        let helm = fake_helm(
            dir.path(),
            r#"case "$*" in
  *"dependency build"*) exit 0 ;;
  *prod.yaml*|*preview/values.yaml*) echo "Error: YAML parse error in $*" >&2; exit 1 ;;
  *) echo "kind: Deployment" ;;
esac
"#,
        );
        let validator = ValuesValidator::new(
            helm,
            Chart::new("web-stack", dir.path().join("charts/app")),
            envs.clone(),
            dir.path().join(".env"),
        );

        let report = validator.render_all("aws").await.unwrap();
        assert_eq!(report.passed.len(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failure_summary().contains("values order:"));
        assert!(report.failure_summary().contains("YAML parse error"));

        let err = validator.validate("aws").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 of 4 environments failed"));
        assert!(msg.contains(&envs.join("live/prod.yaml").display().to_string()));
        assert!(msg.contains(&envs.join("preview/values.yaml").display().to_string()));
    }
}
