//! helm invocations.

use crate::process::ToolCommand;
use common::secret::SecretString;
use std::path::{Path, PathBuf};

/// A chart and the release name it is rendered under.
#[derive(Debug, Clone)]
pub struct Chart {
    pub release: String,
    pub path: PathBuf,
}

impl Chart {
    pub fn new(release: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            release: release.into(),
            path: path.into(),
        }
    }
}

/// Builds helm commands.
#[derive(Debug, Clone)]
pub struct Helm {
    program: String,
    leading_args: Vec<String>,
}

impl Default for Helm {
    fn default() -> Self {
        Self::new()
    }
}

impl Helm {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("helm", Vec::new())
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).args(self.leading_args.iter().cloned())
    }

    /// `helm registry login <host> --username <user> --password-stdin`.
    pub fn registry_login(&self, host: &str, username: &str, token: SecretString) -> ToolCommand {
        self.command()
            .args(["registry", "login", host, "--username", username, "--password-stdin"])
            .stdin(token)
    }

    pub fn dependency_build(&self, chart: &Path) -> ToolCommand {
        self.command()
            .args(["dependency", "build"])
            .arg(chart.display().to_string())
    }

    /// `helm template` with one `--values` per layer, in order.
    pub fn template<'a>(&self, chart: &Chart, values: impl IntoIterator<Item = &'a Path>) -> ToolCommand {
        let mut cmd = self.command()
            .args(["template", chart.release.as_str()])
            .arg(chart.path.display().to_string());
        for file in values {
            cmd = cmd.arg("--values").arg(file.display().to_string());
        }
        cmd.arg("--debug")
    }
}
