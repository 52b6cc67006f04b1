//! ECS FIS Sidecar Binary
//!
//! Entrypoint for the fault injection sidecar container. Registers the task
//! with SSM, runs the agent and cleans up on SIGTERM.
//!
//! # Usage
//! ```bash
//! ecs-fis-sidecar [--config ecs-fis.toml] [--verbose]
//! ```
//!
//! With the native runtime the construct passes the sidecar settings as JSON
//! in `ECS_FIS_SIDECAR_SETTINGS`; a `--config` file takes precedence.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use ecs_fis_core::config::{SidecarSettings, SETTINGS_ENV_VAR};
use ecs_fis_core::FisConfig;
use ecs_fis_sidecar::{AwsCli, NativeAgent, SidecarEnv, Supervisor};

/// ECS FIS Sidecar - SSM agent supervisor for fault injection
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (default: built-in settings)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Sidecar settings as JSON
    #[arg(long, value_name = "JSON", env = SETTINGS_ENV_VAR, hide_env_values = true)]
    settings: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose; stdout stays free for the agent
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.verbose)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Installed before anything else so an early SIGTERM still tears down
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
    };

    let settings = load_settings(&args)?;
    let env = SidecarEnv::from_env(&settings)?;
    let runtime = NativeAgent::new(settings.agent_binary.clone());
    let supervisor = Supervisor::new(settings, env, AwsCli::new(), runtime);

    let outcome = supervisor.run(shutdown).await?;
    tracing::debug!("Sidecar finished: {:?}", outcome);
    Ok(outcome.exit_code())
}

fn load_settings(args: &Args) -> Result<SidecarSettings> {
    if let Some(path) = &args.config {
        let config =
            FisConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
        return Ok(config.sidecar);
    }

    match &args.settings {
        Some(json) => SidecarSettings::from_json(json)
            .with_context(|| format!("parsing {SETTINGS_ENV_VAR}")),
        None => Ok(SidecarSettings::default()),
    }
}
