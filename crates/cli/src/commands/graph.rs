use anyhow::Result;
use colored::*;
use crew_core::configs::Config;
use crew_core::graph::build_action_graphs;

pub fn execute(config: &Config, action: Option<&str>) -> Result<()> {
    println!("{}", "Action Dependency Graphs:".bold().underline());

    let graphs = build_action_graphs(config).map_err(|e| anyhow::anyhow!("{}", e))?;

    for graph in graphs.graphs.values() {
        if action.is_some_and(|a| a != graph.action) {
            continue;
        }

        println!("\n{}", graph.action.blue().bold());
        for project in &graph.topo_order {
            let needs = graph.needs_of(project);
            if needs.is_empty() {
                println!("  {} {}", project, "no needs".dimmed());
            } else {
                println!("  {} {} {}", project, "needs:".dimmed(), needs.join(", "));
            }
        }
    }

    Ok(())
}
