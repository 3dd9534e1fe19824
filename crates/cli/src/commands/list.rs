use anyhow::Result;
use colored::*;
use crew_core::configs::Config;

pub fn execute(config: &Config) -> Result<()> {
    println!("{}", "Projects".bold().underline());

    if config.projects.is_empty() {
        println!("  {}", "No projects configured".dimmed());
        return Ok(());
    }

    for (name, project) in &config.projects {
        println!("{} {}", name.blue().bold(), project.remote.dimmed());

        for (action_name, action) in &project.actions {
            let groups = action.groups.keys().cloned().collect::<Vec<_>>().join(", ");
            println!("  {} {}", action_name.cyan(), format!("[{groups}]").dimmed());
        }
    }

    Ok(())
}
