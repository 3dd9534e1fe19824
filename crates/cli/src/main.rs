use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crew_core::configs::load_config;

mod commands;

/// Crew - run actions across many repositories
#[derive(Parser)]
#[command(name = "crew")]
#[command(about = "Runs actions across many repositories, honoring cross-project dependencies")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "crew.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute the selected tasks
    Run {
        /// Action names, `+`-joined; `*` or `all` matches every action
        action: String,
        /// Group names, `+`-joined; `*` or `all` matches every group
        group: String,
        /// Project names, `+`-joined; defaults to every project
        #[arg(default_value = "*")]
        project: String,
        /// Override the global ceiling on concurrently running tasks
        #[arg(long)]
        max_task_parallelization: Option<usize>,
        /// Ignore cross-project needs (no gating, no dependency closure)
        #[arg(long)]
        ignore_needs: bool,
        /// Disable the live viewport and print plain passthrough output
        #[arg(long)]
        quiet: bool,
        /// Directory for per-task log files (default: .crew-logs under the
        /// checkout root)
        #[arg(long)]
        logs: Option<PathBuf>,
    },
    /// Show the planned task set without executing it
    Plan {
        action: String,
        group: String,
        #[arg(default_value = "*")]
        project: String,
    },
    /// Show per-action dependency graphs
    Graph {
        /// Restrict to one action name
        action: Option<String>,
    },
    /// List configured projects and their actions
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    match cli.command {
        Commands::Run {
            action,
            group,
            project,
            max_task_parallelization,
            ignore_needs,
            quiet,
            logs,
        } => {
            commands::run::execute(
                config,
                commands::run::RunOptions {
                    action,
                    group,
                    project,
                    max_task_parallelization,
                    ignore_needs,
                    quiet,
                    logs,
                },
            )
            .await
        }
        Commands::Plan {
            action,
            group,
            project,
        } => commands::plan::execute(&config, &action, &group, &project),
        Commands::Graph { action } => commands::graph::execute(&config, action.as_deref()),
        Commands::List => commands::list::execute(&config),
    }
}
