use anyhow::{Context, Result};
use clap::Parser;
use common::config::StackConfig;
use common::dotenv::{load_dotenv_if_present, DotenvOutcome};
use devloop::cli::Cli;
use devloop::tasks::TaskContext;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "devloop=info,common=info".into());

    let json = std::env::var("DEVLOOP_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    match load_dotenv_if_present(&cli.env_file)
        .with_context(|| format!("failed to load {}", cli.env_file.display()))?
    {
        DotenvOutcome::NotFound => {}
        DotenvOutcome::Loaded { applied, skipped } => {
            info!(applied, skipped, "loaded {}", cli.env_file.display());
        }
    }

    let config = StackConfig::from_env().context("invalid environment configuration")?;
    let ctx = TaskContext::new(config, cli.repo_root, cli.env_file);

    devloop::run_task(&cli.task, &ctx)
        .await
        .with_context(|| format!("task {} failed", cli.task.name()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let task = cli.task.name();
    match run(cli).await {
        Ok(()) => {
            info!("{task} completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
