use std::path::PathBuf;

use anyhow::Result;
use colored::*;
use crew_core::configs::Config;
use crew_core::execution::{LiveOutput, TaskRunner, TaskState};
use crew_core::graph::build_action_graphs;
use crew_core::logs::{default_log_dir, write_logs};
use crew_core::planner::{plan, Selection};
use crew_core::startup::run_startup;

pub struct RunOptions {
    pub action: String,
    pub group: String,
    pub project: String,
    pub max_task_parallelization: Option<usize>,
    pub ignore_needs: bool,
    pub quiet: bool,
    pub logs: Option<PathBuf>,
}

pub async fn execute(mut config: Config, opts: RunOptions) -> Result<()> {
    if let Some(max) = opts.max_task_parallelization {
        config.default_parallel = max;
    }
    if opts.ignore_needs {
        config.needs = false;
    }

    // Graph validation fails fast, before any process starts.
    build_action_graphs(&config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let selection = Selection::parse(&opts.action, &opts.group, &opts.project);
    let mut tasks = plan(&config, &selection).map_err(|e| anyhow::anyhow!("{}", e))?;

    if !config.startup.is_empty() {
        println!("{}", "Running startup commands".bold());
        run_startup(&config, &crew_core::execution::OutputSink::null())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    println!(
        "{} {} {} {}",
        "Running".bold(),
        opts.action.cyan(),
        opts.group.cyan(),
        opts.project.cyan()
    );
    println!();

    let enabled = !opts.quiet && crew_core::execution::output::stdout_is_tty();
    let live = LiveOutput::spawn(tasks.len(), enabled);
    let runner = TaskRunner::from_config(&config);
    let sink = live.sink();

    // On Ctrl-C the run future is dropped, which kills every outstanding
    // child process; the viewport teardown below then restores the cursor
    // before we exit. Interrupted tasks keep whatever state they reached.
    let outcome = tokio::select! {
        result = runner.run(&mut tasks, &sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    drop(sink);
    live.finish().await;

    let dir = opts.logs.clone().unwrap_or_else(|| default_log_dir(&config));
    write_logs(&dir, &tasks).map_err(|e| anyhow::anyhow!("Failed to write logs: {}", e))?;

    let summary = match outcome {
        Some(result) => result.map_err(|e| anyhow::anyhow!("{}", e))?,
        None => anyhow::bail!("Interrupted; logs written to {}", dir.display()),
    };

    for task in &tasks {
        let state = match task.state {
            TaskState::Completed => task.state.to_string().green(),
            TaskState::Failed => task.state.to_string().red().bold(),
            TaskState::SkippedFailedDependency => task.state.to_string().yellow(),
            _ => task.state.to_string().dimmed(),
        };
        println!("  {} {}", task.key.to_string().blue(), state);
    }
    println!("  {}", format!("logs: {}", dir.display()).dimmed());
    println!();

    if summary.success() {
        println!(
            "{} {}",
            "✓".green().bold(),
            format!("{} task(s) completed", summary.completed).green().bold()
        );
        Ok(())
    } else {
        anyhow::bail!("{} task(s) failed", summary.failed)
    }
}
