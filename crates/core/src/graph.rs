//! Per-action dependency graph construction and cycle detection.
//!
//! For every distinct action name declared by any project, a directed graph is
//! built whose nodes are the projects declaring that action and whose edges
//! follow `action.needs`. Cycle detection is iterative (repeated leaf
//! stripping) so a cycle failure can report the exact residual table instead
//! of a stack trace.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::prelude::*;

use crate::configs::Config;
use crate::types::{CrewError, CrewResult};

/// Dependency graph for one action name.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    pub action: String,
    /// `project -> needed project` edges, restricted to projects that declare
    /// the action. Needs pointing at projects without the action are dropped
    /// here, matching the planner's dangling-need rule.
    pub graph: DiGraph<String, ()>,
    /// Leaf-first topological order over the declaring projects.
    pub topo_order: Vec<String>,
}

impl ActionGraph {
    /// Direct needs of `project` for this action, in deterministic order.
    pub fn needs_of(&self, project: &str) -> Vec<String> {
        let Some(node) = self
            .graph
            .node_indices()
            .find(|n| self.graph[*n] == project)
        else {
            return Vec::new();
        };

        let mut needs: Vec<String> = self
            .graph
            .neighbors(node)
            .map(|n| self.graph[n].clone())
            .collect();
        needs.sort();
        needs
    }
}

/// All per-action graphs of a validated config.
#[derive(Debug, Clone, Default)]
pub struct ActionGraphs {
    pub graphs: BTreeMap<String, ActionGraph>,
}

/// Build one dependency graph per distinct action name.
///
/// Fails fast with [`CrewError::PriorityNeedsConflict`] if any action instance
/// declares both `priority` and `needs`, and with [`CrewError::Cycle`] if any
/// per-action need-graph is cyclic. Pure function over the config; no I/O.
pub fn build_action_graphs(config: &Config) -> CrewResult<ActionGraphs> {
    // Precondition check, independent of cycle detection: the two sequencing
    // mechanisms are mutually exclusive.
    for (project_name, project) in &config.projects {
        for (action_name, action) in &project.actions {
            if action.priority.is_some() && !action.needs.is_empty() {
                return Err(CrewError::PriorityNeedsConflict {
                    project: project_name.clone(),
                    action: action_name.clone(),
                });
            }
        }
    }

    let mut action_names = BTreeSet::new();
    for project in config.projects.values() {
        action_names.extend(project.actions.keys().cloned());
    }

    let mut graphs = BTreeMap::new();
    for action_name in action_names {
        let graph = build_single_graph(config, &action_name)?;
        graphs.insert(action_name, graph);
    }

    Ok(ActionGraphs { graphs })
}

fn build_single_graph(config: &Config, action_name: &str) -> CrewResult<ActionGraph> {
    let declaring: BTreeSet<&String> = config
        .projects
        .iter()
        .filter(|(_, project)| project.actions.contains_key(action_name))
        .map(|(name, _)| name)
        .collect();

    // Needs per declaring project, restricted to projects that also declare
    // the action.
    let mut needs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for project_name in &declaring {
        let action = &config.projects[*project_name].actions[action_name];
        let project_needs: BTreeSet<String> = action
            .needs
            .iter()
            .filter(|needed| declaring.contains(needed))
            .cloned()
            .collect();
        needs.insert((*project_name).clone(), project_needs);
    }

    let mut graph = DiGraph::<String, ()>::new();
    let mut node_indices = BTreeMap::new();
    for project_name in needs.keys() {
        let node = graph.add_node(project_name.clone());
        node_indices.insert(project_name.clone(), node);
    }
    for (project_name, project_needs) in &needs {
        for needed in project_needs {
            graph.add_edge(node_indices[project_name], node_indices[needed], ());
        }
    }

    // Iterative leaf stripping: repeatedly remove nodes whose remaining needs
    // are empty. Whatever survives participates in a cycle.
    let mut remaining = needs;
    let mut topo_order = Vec::new();
    loop {
        let leaves: Vec<String> = remaining
            .iter()
            .filter(|(_, n)| n.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        if leaves.is_empty() {
            break;
        }

        for leaf in leaves {
            remaining.remove(&leaf);
            for project_needs in remaining.values_mut() {
                project_needs.remove(&leaf);
            }
            topo_order.push(leaf);
        }
    }

    if !remaining.is_empty() {
        let residual = remaining
            .iter()
            .map(|(project, project_needs)| {
                format!(
                    "  {} -> {}",
                    project,
                    project_needs
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Err(CrewError::Cycle {
            action: action_name.to_string(),
            residual,
        });
    }

    Ok(ActionGraph {
        action: action_name.to_string(),
        graph,
        topo_order,
    })
}
