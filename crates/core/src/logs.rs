//! Post-run log files: one file per `(action, group, project)`.

use std::path::{Path, PathBuf};

use crate::configs::Config;
use crate::execution::task::Task;
use crate::types::CrewResult;

/// Where task logs go when no directory is given: `.crew-logs` under the
/// checkout root, next to the project directories.
pub fn default_log_dir(config: &Config) -> PathBuf {
    config.cwd.join(".crew-logs")
}

/// Write one log file per task under `dir`, created if missing. Called after
/// the run; the captured output lives on the tasks themselves.
pub fn write_logs(dir: &Path, tasks: &[Task]) -> CrewResult<()> {
    std::fs::create_dir_all(dir)?;

    for task in tasks {
        let mut content = String::new();
        content.push_str(&format!("# {}\n", task.key));
        content.push_str(&format!("state: {}\n", task.state));
        content.push_str(&format!("cwd: {}\n", task.context.cwd.display()));
        content.push_str(&format!("cmd: {}\n", task.context.cmd.join(" ")));

        if let Some(result) = &task.result {
            content.push_str(&format!("exit code: {}\n", result.exit_code));
            if let Some(signal) = result.signal {
                content.push_str(&format!("signal: {signal}\n"));
            }
            content.push_str(&format!("started: {}\n", result.started_at.to_rfc3339()));
            content.push_str(&format!("finished: {}\n", result.finished_at.to_rfc3339()));
            content.push_str("\n## stdout\n");
            content.push_str(&result.stdout);
            content.push_str("\n## stderr\n");
            content.push_str(&result.stderr);
        }

        std::fs::write(log_path(dir, task), content)?;
    }

    Ok(())
}

fn log_path(dir: &Path, task: &Task) -> PathBuf {
    let name = format!(
        "{}-{}-{}.log",
        sanitize(&task.key.action),
        sanitize(&task.key.group),
        sanitize(&task.key.project)
    );
    dir.join(name)
}

/// Group names may contain path-hostile characters (notably the wildcard
/// group `"*"`).
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
