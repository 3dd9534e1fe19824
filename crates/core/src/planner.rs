//! Selection-to-task planning.
//!
//! Expands a user selection of actions, groups, and projects into a concrete
//! task set, resolving wildcard group fallback and pulling in transitively
//! required dependencies until a fixpoint is reached.

use std::collections::HashSet;

use tracing::debug;

use crate::configs::{Action, Config, WILDCARD_GROUP};
use crate::execution::task::{GroupKey, Task, TaskContext};
use crate::project_dir;
use crate::types::{CrewError, CrewResult};

/// One `+`-delimited selector list. `*` or the alias `all` matches everything.
#[derive(Debug, Clone)]
pub struct Selector {
    items: Vec<String>,
    wildcard: bool,
}

impl Selector {
    pub fn parse(raw: &str) -> Self {
        let items: Vec<String> = raw
            .split('+')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let wildcard = items.iter().any(|s| s == "*" || s == "all");
        Self { items, wildcard }
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn matches(&self, name: &str) -> bool {
        self.wildcard || self.items.iter().any(|s| s == name)
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }
}

/// The three selector lists of one invocation.
#[derive(Debug, Clone)]
pub struct Selection {
    pub actions: Selector,
    pub groups: Selector,
    pub projects: Selector,
}

impl Selection {
    pub fn parse(actions: &str, groups: &str, projects: &str) -> Self {
        Self {
            actions: Selector::parse(actions),
            groups: Selector::parse(groups),
            projects: Selector::parse(projects),
        }
    }

    fn describe(&self) -> String {
        fn part(selector: &Selector) -> String {
            if selector.is_wildcard() {
                "*".to_string()
            } else {
                selector.items().join("+")
            }
        }
        format!(
            "{} {} {}",
            part(&self.actions),
            part(&self.groups),
            part(&self.projects)
        )
    }
}

/// Resolve a requested group name against an action's declared groups.
///
/// A literal declared group always wins; the wildcard group `"*"` is selected
/// only as a fallback. Returns the declared group name the task will run.
fn resolve_group<'a>(action: &'a Action, requested: &'a str) -> Option<&'a str> {
    if action.groups.contains_key(requested) {
        Some(requested)
    } else if action.groups.contains_key(WILDCARD_GROUP) {
        Some(WILDCARD_GROUP)
    } else {
        None
    }
}

/// Expand `selection` into a concrete task set, including dependency closure
/// when `config.needs` is enabled. Deterministic; stable name order.
pub fn plan(config: &Config, selection: &Selection) -> CrewResult<Vec<Task>> {
    let target_projects: Vec<&String> = if selection.projects.is_wildcard() {
        config.projects.keys().collect()
    } else {
        let mut targets = Vec::new();
        for requested in selection.projects.items() {
            let (name, _) = config
                .projects
                .get_key_value(requested)
                .ok_or_else(|| CrewError::UnknownProject(requested.clone()))?;
            targets.push(name);
        }
        targets
    };

    // Worklist of `(key, requested group)` pairs. The requested group is
    // carried separately from the key: a task that fell back to the declared
    // `"*"` group still resolves its needs against the group the user asked
    // for, so a needed project declaring that group literally is matched.
    let mut queue: Vec<(GroupKey, String)> = Vec::new();
    let mut planned: HashSet<GroupKey> = HashSet::new();

    for project_name in target_projects {
        let project = &config.projects[project_name];
        for (action_name, action) in &project.actions {
            if !selection.actions.matches(action_name) {
                continue;
            }

            // Resolve requested groups to declared group names. Requesting a
            // wildcard selects every declared group; a literal request may
            // fall back to the declared "*" group. Two literals falling back
            // to the same declared group collapse into one task.
            let mut resolved: Vec<(&str, &str)> = Vec::new();
            if selection.groups.is_wildcard() {
                resolved.extend(action.groups.keys().map(|g| (g.as_str(), g.as_str())));
            } else {
                for requested in selection.groups.items() {
                    if let Some(group) = resolve_group(action, requested) {
                        if !resolved.iter().any(|(g, _)| *g == group) {
                            resolved.push((group, requested));
                        }
                    }
                }
            }

            for (group, requested) in resolved {
                let key = GroupKey::new(project_name.clone(), action_name.clone(), group);
                if planned.insert(key.clone()) {
                    queue.push((key, requested.to_string()));
                }
            }
        }
    }

    // Dependency closure: keep adding needed tasks until nothing new appears,
    // propagating the requested group along the needs chain. Needs whose
    // project does not declare a matching group are dropped by make_task, so
    // every need in the set stays resolvable.
    let mut tasks: Vec<Task> = Vec::new();
    let mut cursor = 0;
    while cursor < queue.len() {
        let (key, requested) = queue[cursor].clone();
        let task = make_task(config, key, &requested);
        if config.needs {
            for need in &task.needs {
                if planned.insert(need.clone()) {
                    queue.push((need.clone(), requested.clone()));
                }
            }
        }
        tasks.push(task);
        cursor += 1;
    }

    if tasks.is_empty() {
        return Err(CrewError::EmptySelection(selection.describe()));
    }

    debug!(task_count = tasks.len(), "planned task set");
    Ok(tasks)
}

/// Build the task for an already-resolved `(project, action, group)` triple.
///
/// Needs are resolved against `requested`, the group name the user asked for,
/// not against `key.group`: when the task itself fell back to the declared
/// `"*"` group, a needed project declaring the requested group literally must
/// still gate it.
fn make_task(config: &Config, key: GroupKey, requested: &str) -> Task {
    let project = &config.projects[&key.project];
    let action = &project.actions[&key.action];

    let context = TaskContext {
        cwd: project_dir::dir_for(&config.cwd, &project.remote),
        cmd: action.groups[&key.group].clone(),
        priority: action.priority.or(project.priority).unwrap_or(0),
    };

    let needs = if config.needs {
        action
            .needs
            .iter()
            .filter_map(|needed_project| {
                let needed_action = config
                    .projects
                    .get(needed_project)?
                    .actions
                    .get(&key.action)?;
                let group = resolve_group(needed_action, requested)?;
                Some(GroupKey::new(
                    needed_project.clone(),
                    key.action.clone(),
                    group,
                ))
            })
            .collect()
    } else {
        Vec::new()
    };

    Task::new(key, context, needs)
}
