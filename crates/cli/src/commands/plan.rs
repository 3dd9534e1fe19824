use std::collections::BTreeMap;

use anyhow::Result;
use colored::*;
use crew_core::configs::Config;
use crew_core::execution::Task;
use crew_core::graph::build_action_graphs;
use crew_core::planner::{plan, Selection};

pub fn execute(config: &Config, action: &str, group: &str, project: &str) -> Result<()> {
    println!(
        "{} {} {} {}",
        "Execution plan for".bold(),
        action.cyan(),
        group.cyan(),
        project.cyan()
    );

    build_action_graphs(config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let selection = Selection::parse(action, group, project);
    let tasks = plan(config, &selection).map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut waves: BTreeMap<i64, Vec<&Task>> = BTreeMap::new();
    for task in &tasks {
        waves.entry(task.context.priority).or_default().push(task);
    }

    for (priority, wave_tasks) in waves {
        println!("\n{}", format!("Priority {priority}").bold());
        for task in wave_tasks {
            if task.needs.is_empty() {
                println!("  {}", task.key.to_string().blue());
            } else {
                let needs = task
                    .needs
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "  {} {} {}",
                    task.key.to_string().blue(),
                    "needs:".dimmed(),
                    needs.dimmed()
                );
            }
        }
    }

    Ok(())
}
