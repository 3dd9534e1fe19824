use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{CrewError, CrewResult};

/// A named variant of an action's command. The wildcard group `"*"` is used
/// as a fallback when a requested group name is not declared.
pub const WILDCARD_GROUP: &str = "*";

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchFor {
    pub regex: String,
    pub hint: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Action {
    /// Command vector per group name. `"*"` is the wildcard fallback group.
    pub groups: BTreeMap<String, Vec<String>>,
    /// Projects whose same-named action must complete before this one runs.
    /// Mutually exclusive with `priority`.
    #[serde(default)]
    pub needs: Vec<String>,
    pub priority: Option<i64>,
    #[serde(default)]
    pub search_for: Vec<SearchFor>,
}

/// A named command run sequentially before any planned task.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Startup {
    pub cmd: Vec<String>,
    /// Shown when the command fails, e.g. "is docker running?".
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Project {
    pub remote: String,
    pub default_branch: String,
    pub priority: Option<i64>,
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
}

/// Validated top-level configuration. Immutable after load; passed explicitly
/// through every engine call rather than read from globals.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    /// Commands run sequentially, in name order, before any task launches.
    /// A failing startup command aborts the whole run.
    #[serde(default)]
    pub startup: BTreeMap<String, Startup>,
    /// Root directory the project checkouts live under. Derived from the
    /// config file location, never from the YAML itself.
    #[serde(skip)]
    pub cwd: PathBuf,
    /// Whether cross-project needs gate execution and pull in dependency
    /// closure during planning.
    #[serde(default = "default_needs")]
    pub needs: bool,
    /// Global ceiling on concurrently running tasks.
    #[serde(default = "default_parallel")]
    pub default_parallel: usize,
    /// Per-action ceilings replacing the global default for that action.
    #[serde(default)]
    pub action_parallel: BTreeMap<String, usize>,
    #[serde(default)]
    pub search_for: Vec<SearchFor>,
}

fn default_needs() -> bool {
    true
}

fn default_parallel() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub fn parse_config(yaml_str: &str) -> CrewResult<Config> {
    let config: Config = serde_yaml::from_str(yaml_str)?;
    Ok(config)
}

/// Load a config file and anchor `cwd` at its parent directory.
pub fn load_config(path: &Path) -> CrewResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CrewError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;

    let mut config = parse_config(&content).map_err(|e| {
        CrewError::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })?;

    config.cwd = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
projects:
  example:
    remote: git@gitlab.com:cego/example.git
    defaultBranch: main
    actions:
      start:
        groups:
          cego.dk: ["docker-compose", "up"]
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert!(config.needs, "needs should default to true");
        assert!(config.default_parallel >= 1);
        assert!(config.action_parallel.is_empty());

        let project = &config.projects["example"];
        assert_eq!(project.default_branch, "main");
        let action = &project.actions["start"];
        assert_eq!(
            action.groups["cego.dk"],
            vec!["docker-compose".to_string(), "up".to_string()]
        );
        assert!(action.needs.is_empty());
        assert!(action.priority.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "projects: {}\nbogus: 1\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn parses_needs_priority_and_overrides() {
        let yaml = r#"
needs: false
defaultParallel: 3
actionParallel:
  deploy: 1
projects:
  db:
    remote: git@gitlab.com:cego/db.git
    defaultBranch: main
    priority: 0
    actions:
      deploy:
        priority: 2
        groups:
          "*": ["echo", "db"]
"#;
        let config = parse_config(yaml).unwrap();
        assert!(!config.needs);
        assert_eq!(config.default_parallel, 3);
        assert_eq!(config.action_parallel["deploy"], 1);
        assert_eq!(config.projects["db"].priority, Some(0));
        assert_eq!(config.projects["db"].actions["deploy"].priority, Some(2));
    }

    #[test]
    fn load_anchors_cwd_at_config_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crew.yml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cwd, dir.path());
    }
}
