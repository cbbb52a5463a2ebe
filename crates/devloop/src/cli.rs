//! Command-line surface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "devloop",
    version,
    about = "Inner-loop and CI tasks for the web stack"
)]
pub struct Cli {
    /// Dotenv file loaded before anything else; existing variables win
    #[arg(long, global = true, default_value = ".env", value_name = "PATH")]
    pub env_file: PathBuf,

    /// Repository root holding charts/, envs/ and the env-tests crate
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    pub repo_root: PathBuf,

    #[command(subcommand)]
    pub task: Task,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Start the Tilt inner loop
    Dev,
    /// Delete the local E2E namespace and stop Tilt
    Clean,
    /// Render every environment's values against the chart, offline
    #[command(name = "validate:envs")]
    ValidateEnvs {
        /// Cloud selector; loads envs/<cloud>.yaml as the first layer
        cloud: Option<String>,
    },
    /// Smoke tests against the running Tilt environment
    #[command(name = "test:localdev")]
    TestLocalDev,
    /// Deploy locally built images into Kind and smoke test them
    #[command(name = "test:localE2E")]
    TestLocalE2E,
    /// Deploy CI artifacts into Kind and smoke test them
    #[command(name = "test:ci")]
    TestCi,
    /// Smoke tests against the live console
    #[command(name = "test:live")]
    TestLive,
}

impl Task {
    /// Name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Dev => "dev",
            Task::Clean => "clean",
            Task::ValidateEnvs { .. } => "validate:envs",
            Task::TestLocalDev => "test:localdev",
            Task::TestLocalE2E => "test:localE2E",
            Task::TestCi => "test:ci",
            Task::TestLive => "test:live",
        }
    }

    /// Tools that must be on `PATH` before the task starts.
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Task::Dev => &["tilt"],
            Task::Clean => &["kubectl", "tilt"],
            Task::ValidateEnvs { .. } => &["helm"],
            Task::TestLocalDev | Task::TestLive => &["cargo"],
            Task::TestLocalE2E | Task::TestCi => &["skaffold", "kubectl", "cargo"],
        }
    }
}
