//! Startup commands: named commands run sequentially, in name order, before
//! any planned task launches. A failure aborts the run before planning output
//! reaches the terminal.

use tracing::debug;

use crate::configs::{Config, WILDCARD_GROUP};
use crate::execution::output::OutputSink;
use crate::execution::task::{run_command, GroupKey, TaskContext};
use crate::types::{CrewError, CrewResult};

/// Run every configured startup command to completion, one at a time.
///
/// The failure message carries the command's captured stderr and the
/// configured hint, so the caller can surface it directly.
pub async fn run_startup(config: &Config, sink: &OutputSink) -> CrewResult<()> {
    for (name, item) in &config.startup {
        debug!(startup = %name, "running startup command");
        let key = GroupKey::new(name.clone(), "startup", WILDCARD_GROUP);
        let context = TaskContext {
            cwd: config.cwd.clone(),
            cmd: item.cmd.clone(),
            priority: 0,
        };

        let result = run_command(&key, &context, sink).await;
        if !result.success() {
            let mut message = format!(
                "Startup command '{}' failed with exit code {}",
                name, result.exit_code
            );
            let stderr = result.stderr.trim_end();
            if !stderr.is_empty() {
                message.push('\n');
                message.push_str(stderr);
            }
            if let Some(hint) = &item.hint {
                message.push_str(&format!("\nhint: {hint}"));
            }
            return Err(CrewError::Startup(message));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::parse_config;

    fn config(yaml: &str) -> Config {
        let mut config = parse_config(yaml).unwrap();
        config.cwd = std::env::temp_dir();
        config
    }

    #[tokio::test]
    async fn runs_all_startup_commands_in_name_order() {
        let config = config(
            r#"
projects: {}
startup:
  a-first:
    cmd: ["true"]
  b-second:
    cmd: ["true"]
"#,
        );

        let sink = OutputSink::null();
        run_startup(&config, &sink).await.unwrap();
    }

    #[tokio::test]
    async fn failure_carries_the_hint() {
        let config = config(
            r#"
projects: {}
startup:
  docker:
    cmd: ["sh", "-c", "echo daemon unreachable >&2; exit 1"]
    hint: "is docker running?"
"#,
        );

        let sink = OutputSink::null();
        let err = run_startup(&config, &sink).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("docker"));
        assert!(message.contains("daemon unreachable"));
        assert!(message.contains("is docker running?"));
    }

    #[tokio::test]
    async fn no_startup_section_is_a_no_op() {
        let config = config("projects: {}\n");
        let sink = OutputSink::null();
        run_startup(&config, &sink).await.unwrap();
    }
}
