//! Devloop
//!
//! Task runner for the web stack's inner loop and CI: Tilt for local
//! development, offline helm validation of every environment's values,
//! Kind deployments through skaffold, and the `env-tests` smoke suite run
//! through a port-forward.
//!
//! Every external tool is driven through [`process::ToolCommand`] so secret
//! arguments never reach the logs.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod deploy;
pub mod helm;
pub mod kube;
pub mod port_forward;
pub mod process;
pub mod registry;
pub mod runner;
pub mod targets;
pub mod tasks;
pub mod values;

use cli::Task;
use common::error::Result;
use tasks::TaskContext;

/// Check the task's tools, then run it to completion.
///
/// # Errors
///
/// `DevloopError::Configuration` naming a missing tool, otherwise whatever
/// the task reports.
pub async fn run_task(task: &Task, ctx: &TaskContext) -> Result<()> {
    process::require_tools(task.required_tools())?;

    match task {
        Task::Dev => tasks::dev(ctx).await,
        Task::Clean => tasks::clean(ctx).await,
        Task::ValidateEnvs { cloud } => tasks::validate_envs(ctx, cloud.as_deref()).await,
        Task::TestLocalDev => tasks::test_localdev(ctx).await,
        Task::TestLocalE2E => tasks::test_local_e2e(ctx).await,
        Task::TestCi => tasks::test_ci(ctx).await,
        Task::TestLive => tasks::test_live(ctx).await,
    }
}
