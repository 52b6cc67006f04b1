//! ECS FIS CLI
//!
//! Prepares Fargate task definitions for AWS FIS experiments.
//!
//! # Usage
//! ```bash
//! ecs-fis synth --task task.json --stack-name orders --actions cpu-stress,network-latency
//! ecs-fis synth --task task.json --native-sidecar --sidecar-image registry.example.com/fis-sidecar:1.0
//! ecs-fis preconditions --actions kill-process
//! ecs-fis script --config ecs-fis.toml
//! ecs-fis init-config --output ecs-fis.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use ecs_fis_core::action::{FaultActionKind, FaultActionSet};
use ecs_fis_core::resolver::{preconditions_for, resolve_preconditions};
use ecs_fis_core::script;
use ecs_fis_core::FisConfig;

mod synth;

/// ECS FIS - Fault injection for ECS Fargate tasks
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a task definition with fault injection as a CloudFormation template
    Synth {
        /// Task definition JSON
        #[arg(short, long, value_name = "FILE")]
        task: PathBuf,

        /// Stack name, used in generated log group names
        #[arg(long, default_value = "ecs-fis")]
        stack_name: String,

        /// Pin the region instead of using AWS::Region
        #[arg(long)]
        region: Option<String>,

        /// Pin the account instead of using AWS::AccountId
        #[arg(long)]
        account: Option<String>,

        /// Id prefixing generated resources
        #[arg(long, default_value = "FaultInjection")]
        id: String,

        /// Fault actions to support (default: all)
        #[arg(short, long, value_delimiter = ',')]
        actions: Vec<FaultActionKind>,

        /// Existing log group for the agent
        #[arg(long, value_name = "ARN")]
        log_group_arn: Option<String>,

        /// Existing role for the agent
        #[arg(long, value_name = "ARN")]
        agent_role_arn: Option<String>,

        /// Settings file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Run the ecs-fis-sidecar supervisor instead of the lifecycle script
        #[arg(long)]
        native_sidecar: bool,

        /// Sidecar image; needed with --native-sidecar unless the config sets one
        #[arg(long, value_name = "IMAGE")]
        sidecar_image: Option<String>,

        /// Write the template here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show the runtime preconditions of a set of fault actions
    Preconditions {
        /// Fault actions (default: all)
        #[arg(short, long, value_delimiter = ',')]
        actions: Vec<FaultActionKind>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the sidecar lifecycle script
    Script {
        /// Settings file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Write the default settings file
    InitConfig {
        /// Destination
        #[arg(short, long, value_name = "FILE", default_value = "ecs-fis.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries command output
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Synth {
            task,
            stack_name,
            region,
            account,
            id,
            actions,
            log_group_arn,
            agent_role_arn,
            config,
            native_sidecar,
            sidecar_image,
            output,
        } => {
            let opts = synth::SynthOptions {
                task,
                stack_name,
                region,
                account,
                id,
                actions,
                log_group_arn,
                agent_role_arn,
                config,
                native_sidecar,
                sidecar_image,
            };
            let rendered = synth::run(&opts)?.to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("{} {}", "Template written to".green(), path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Preconditions { actions, json } => {
            let requested = if actions.is_empty() {
                None
            } else {
                Some(actions.into_iter().collect::<FaultActionSet>())
            };
            let actions = FaultActionSet::requested_or_all(requested);
            let resolved = resolve_preconditions(&actions);

            if json {
                let doc = serde_json::json!({
                    "actions": actions,
                    "preconditions": resolved,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                for kind in actions.iter() {
                    let rows: Vec<&str> = preconditions_for(kind).iter().map(|p| p.as_str()).collect();
                    let rows = if rows.is_empty() {
                        "-".dimmed().to_string()
                    } else {
                        rows.join(", ")
                    };
                    println!("{:<22} {}", kind.as_str().bold(), rows);
                }
                println!();
                if resolved.is_empty() {
                    println!("{}", "No runtime preconditions".green());
                } else {
                    for precondition in &resolved {
                        println!("{} {}", "requires".yellow(), precondition);
                    }
                }
            }
        }
        Commands::Script { config } => {
            let config = synth::load_config(config.as_deref())?;
            println!("{}", script::assemble(&config.sidecar)?);
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists, pass --force to overwrite", output.display());
            }
            FisConfig::default()
                .to_file(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} {}", "Default settings written to".green(), output.display());
        }
    }

    Ok(())
}
