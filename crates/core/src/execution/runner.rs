//! Wave-based concurrent task runner.
//!
//! Distinct priority values, sorted ascending, define sequential waves. A
//! wave fully drains (every task of that wave terminal, including chains
//! unblocked mid-wave) before the next begins; the drain is enforced
//! structurally by joining a `FuturesUnordered` of all in-flight tasks.
//! Within a wave the partial order is exactly the needs relation.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::configs::Config;
use crate::types::{CrewError, CrewResult};

use super::output::OutputSink;
use super::task::{run_command, GroupKey, Task, TaskResult, TaskState};

/// Per-state counts for the finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped_duplicate: usize,
    pub skipped_failed_dependency: usize,
}

impl RunSummary {
    /// The run as a whole succeeded only if no task failed.
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Drives a planned task set to completion under priority, dependency, and
/// concurrency rules.
pub struct TaskRunner {
    default_parallel: usize,
    action_parallel: BTreeMap<String, usize>,
}

impl TaskRunner {
    pub fn new(default_parallel: usize, action_parallel: BTreeMap<String, usize>) -> Self {
        Self {
            default_parallel: default_parallel.max(1),
            action_parallel,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.default_parallel, config.action_parallel.clone())
    }

    /// Run every task to a terminal state. Tasks are mutated in place and
    /// retained, with their results, for summary and log purposes.
    pub async fn run(&self, tasks: &mut [Task], sink: &OutputSink) -> CrewResult<RunSummary> {
        let mut state = RunState::build(tasks)?;

        // One semaphore per ceiling: an action override replaces the global
        // default for that action's tasks.
        let global = Arc::new(Semaphore::new(self.default_parallel));
        let overrides: HashMap<String, Arc<Semaphore>> = self
            .action_parallel
            .iter()
            .map(|(action, &limit)| (action.clone(), Arc::new(Semaphore::new(limit.max(1)))))
            .collect();

        let mut waves: Vec<i64> = tasks.iter().map(|t| t.context.priority).collect();
        waves.sort_unstable();
        waves.dedup();

        for wave in waves {
            debug!(wave, "starting priority wave");
            let mut running: FuturesUnordered<BoxFuture<'static, (usize, TaskResult)>> =
                FuturesUnordered::new();

            let initial: Vec<usize> = (0..tasks.len())
                .filter(|&idx| tasks[idx].context.priority <= wave && !tasks[idx].state.is_terminal())
                .collect();
            schedule(
                initial, wave, tasks, &mut state, &mut running, sink, &global, &overrides,
            );

            // The wave is drained exactly when no task of it is still in
            // flight and nothing else became eligible.
            while let Some((idx, result)) = running.next().await {
                let failed = !result.success();
                tasks[idx].result = Some(result);
                tasks[idx].state = if failed {
                    TaskState::Failed
                } else {
                    TaskState::Completed
                };
                sink.task_finished(&tasks[idx].key, tasks[idx].state);
                debug!(task = %tasks[idx].key, state = %tasks[idx].state, "task finished");

                if failed {
                    cascade_skip(idx, tasks, &state, sink);
                } else {
                    let unlocked = state.unlock_dependents(idx, tasks);
                    schedule(
                        unlocked, wave, tasks, &mut state, &mut running, sink, &global,
                        &overrides,
                    );
                }
            }
            debug!(wave, "wave drained");
        }

        Ok(summarize(tasks))
    }
}

/// Bookkeeping shared across a run: unresolved needs per task, the reverse
/// needs relation, and the dedup set. Mutated only between suspension points,
/// so each check-then-mark sequence is atomic.
struct RunState {
    remaining_needs: Vec<HashSet<GroupKey>>,
    dependents: HashMap<GroupKey, Vec<usize>>,
    launched: HashSet<(PathBuf, String)>,
}

impl RunState {
    fn build(tasks: &[Task]) -> CrewResult<Self> {
        let mut keys: HashSet<&GroupKey> = HashSet::new();
        for task in tasks {
            if !keys.insert(&task.key) {
                return Err(CrewError::Runner(format!(
                    "duplicate task key '{}' in planned set",
                    task.key
                )));
            }
        }
        for task in tasks {
            for need in &task.needs {
                if !keys.contains(need) {
                    return Err(CrewError::Runner(format!(
                        "task '{}' needs '{}' which is not in the planned set",
                        task.key, need
                    )));
                }
            }
        }

        let remaining_needs: Vec<HashSet<GroupKey>> = tasks
            .iter()
            .map(|t| t.needs.iter().cloned().collect())
            .collect();

        let mut dependents: HashMap<GroupKey, Vec<usize>> = HashMap::new();
        for (idx, task) in tasks.iter().enumerate() {
            for need in &task.needs {
                dependents.entry(need.clone()).or_default().push(idx);
            }
        }

        Ok(Self {
            remaining_needs,
            dependents,
            launched: HashSet::new(),
        })
    }

    /// Remove the completed task's key from every dependent's needs and
    /// return the dependents that just became eligible.
    fn unlock_dependents(&mut self, completed: usize, tasks: &mut [Task]) -> Vec<usize> {
        let key = tasks[completed].key.clone();
        let mut unlocked = Vec::new();
        for &dep_idx in self.dependents.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
            let needs = &mut self.remaining_needs[dep_idx];
            if needs.remove(&key) && needs.is_empty() && tasks[dep_idx].state == TaskState::Blocked
            {
                tasks[dep_idx].state = TaskState::Pending;
                unlocked.push(dep_idx);
            }
        }
        unlocked
    }
}

/// Launch every eligible task from `queue`, deduplicating on `(cwd, cmd)`.
/// Duplicates complete synchronously and may unlock further tasks, which are
/// fed back into the queue, so one call settles the whole chain.
#[allow(clippy::too_many_arguments)]
fn schedule(
    queue: Vec<usize>,
    wave: i64,
    tasks: &mut [Task],
    state: &mut RunState,
    running: &mut FuturesUnordered<BoxFuture<'static, (usize, TaskResult)>>,
    sink: &OutputSink,
    global: &Arc<Semaphore>,
    overrides: &HashMap<String, Arc<Semaphore>>,
) {
    let mut queue: VecDeque<usize> = queue.into();
    while let Some(idx) = queue.pop_front() {
        if tasks[idx].state != TaskState::Pending
            || tasks[idx].context.priority > wave
            || !state.remaining_needs[idx].is_empty()
        {
            continue;
        }

        let dedup_key = tasks[idx].dedup_key();
        if !state.launched.insert(dedup_key) {
            // Already launched earlier in the run: no process, counted as
            // completed for dependency-unlocking purposes.
            tasks[idx].state = TaskState::SkippedDuplicate;
            sink.task_finished(&tasks[idx].key, tasks[idx].state);
            queue.extend(state.unlock_dependents(idx, tasks));
            continue;
        }

        tasks[idx].state = TaskState::Running;
        let key = tasks[idx].key.clone();
        let context = tasks[idx].context.clone();
        let sink = sink.clone();
        let semaphore = overrides
            .get(&key.action)
            .cloned()
            .unwrap_or_else(|| Arc::clone(global));

        running.push(Box::pin(async move {
            // Holding the permit across the whole child process bounds the
            // number of concurrently running commands.
            let _permit = semaphore.acquire_owned().await;
            sink.task_started(&key);
            let result = run_command(&key, &context, &sink).await;
            (idx, result)
        }));
    }
}

/// Depth-first, total propagation over the needs graph: every direct or
/// transitive dependent of a failed task is skipped and never launched.
fn cascade_skip(failed: usize, tasks: &mut [Task], state: &RunState, sink: &OutputSink) {
    let mut stack = vec![tasks[failed].key.clone()];
    while let Some(key) = stack.pop() {
        for &dep_idx in state.dependents.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
            if tasks[dep_idx].state.is_terminal() || tasks[dep_idx].state == TaskState::Running {
                continue;
            }
            tasks[dep_idx].state = TaskState::SkippedFailedDependency;
            sink.task_finished(&tasks[dep_idx].key, tasks[dep_idx].state);
            stack.push(tasks[dep_idx].key.clone());
        }
    }
}

fn summarize(tasks: &[Task]) -> RunSummary {
    let mut summary = RunSummary {
        total: tasks.len(),
        ..RunSummary::default()
    };
    for task in tasks {
        match task.state {
            TaskState::Completed => summary.completed += 1,
            TaskState::Failed => summary.failed += 1,
            TaskState::SkippedDuplicate => summary.skipped_duplicate += 1,
            TaskState::SkippedFailedDependency => summary.skipped_failed_dependency += 1,
            _ => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::output::OutputEvent;
    use crate::execution::task::TaskContext;

    fn task(project: &str, cmd: &[&str], priority: i64, needs: &[&str]) -> Task {
        Task::new(
            GroupKey::new(project, "up", "cego.dk"),
            TaskContext {
                cwd: std::env::temp_dir(),
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                priority,
            },
            needs
                .iter()
                .map(|p| GroupKey::new(*p, "up", "cego.dk"))
                .collect(),
        )
    }

    fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutputEvent>) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn started_projects(events: &[OutputEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Started { key } => Some(key.project.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn dependency_unlock_runs_both_tasks() {
        // d needs e; both complete, run succeeds.
        let mut tasks = vec![
            task("d", &["echo", "d"], 0, &["e"]),
            task("e", &["echo", "e"], 0, &[]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();

        assert!(summary.success());
        assert_eq!(summary.completed, 2);
        assert!(tasks.iter().all(|t| t.state == TaskState::Completed));

        let started = started_projects(&drain_events(&mut rx));
        assert_eq!(started, vec!["e".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn failure_cascades_to_transitive_dependents() {
        // e fails, so d and c are skipped and their commands never spawn.
        let mut tasks = vec![
            task("c", &["echo", "c"], 0, &["d"]),
            task("d", &["echo", "d"], 0, &["e"]),
            task("e", &["sh", "-c", "exit 1"], 0, &[]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();

        assert!(!summary.success());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped_failed_dependency, 2);
        assert_eq!(tasks[0].state, TaskState::SkippedFailedDependency);
        assert_eq!(tasks[1].state, TaskState::SkippedFailedDependency);
        assert!(tasks[0].result.is_none(), "skipped task must not spawn");

        let started = started_projects(&drain_events(&mut rx));
        assert_eq!(started, vec!["e".to_string()]);
    }

    #[tokio::test]
    async fn independent_branches_survive_a_failure() {
        let mut tasks = vec![
            task("bad", &["sh", "-c", "exit 1"], 0, &[]),
            task("good", &["echo", "fine"], 0, &[]),
        ];
        let (sink, _rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(tasks[1].state, TaskState::Completed);
    }

    #[tokio::test]
    async fn identical_commands_are_deduplicated() {
        // Same (cwd, cmd) pair; the spawner runs exactly once and both tasks
        // are reported successful.
        let mut tasks = vec![
            task("a", &["echo", "same"], 0, &[]),
            task("b", &["echo", "same"], 0, &[]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();

        assert!(summary.success());
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped_duplicate, 1);

        let started = started_projects(&drain_events(&mut rx));
        assert_eq!(started.len(), 1, "spawner must be invoked exactly once");
    }

    #[tokio::test]
    async fn duplicate_counts_as_completed_for_unlocking() {
        let mut tasks = vec![
            task("a", &["echo", "same"], 0, &[]),
            task("b", &["echo", "same"], 0, &[]),
            task("c", &["echo", "c"], 0, &["b"]),
        ];
        let (sink, _rx) = OutputSink::channel();

        let runner = TaskRunner::new(1, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();

        assert!(summary.success());
        assert_eq!(tasks[2].state, TaskState::Completed);
    }

    #[tokio::test]
    async fn lower_priority_wave_finishes_first() {
        // Wave 0 fully completes before wave 5 starts.
        let mut tasks = vec![
            task("y", &["echo", "y"], 5, &[]),
            task("x", &["sh", "-c", "sleep 0.2; echo x"], 0, &[]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();
        assert!(summary.success());

        let events = drain_events(&mut rx);
        let started = started_projects(&events);
        assert_eq!(started, vec!["x".to_string(), "y".to_string()]);

        // x must be terminal before y starts.
        let x_finished = events
            .iter()
            .position(|e| matches!(e, OutputEvent::Finished { key, .. } if key.project == "x"))
            .unwrap();
        let y_started = events
            .iter()
            .position(|e| matches!(e, OutputEvent::Started { key } if key.project == "y"))
            .unwrap();
        assert!(x_finished < y_started);
    }

    #[tokio::test]
    async fn unlocked_chain_is_drained_within_the_wave() {
        // A chain unblocked mid-wave must finish before the next wave starts.
        let mut tasks = vec![
            task("late", &["echo", "late"], 1, &[]),
            task("head", &["echo", "head"], 0, &[]),
            task("mid", &["echo", "mid"], 0, &["head"]),
            task("tail", &["echo", "tail"], 0, &["mid"]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(1, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();
        assert_eq!(summary.completed, 4);

        let started = started_projects(&drain_events(&mut rx));
        assert_eq!(
            started,
            vec![
                "head".to_string(),
                "mid".to_string(),
                "tail".to_string(),
                "late".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn a_need_resolves_to_exactly_one_launch() {
        // Two needs completing must promote the dependent exactly once.
        let mut tasks = vec![
            task("a", &["echo", "a"], 0, &[]),
            task("b", &["echo", "b"], 0, &[]),
            task("joined", &["echo", "joined"], 0, &["a", "b"]),
        ];
        let (sink, mut rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let summary = runner.run(&mut tasks, &sink).await.unwrap();
        assert!(summary.success());

        let started = started_projects(&drain_events(&mut rx));
        assert_eq!(
            started.iter().filter(|p| p.as_str() == "joined").count(),
            1
        );
    }

    #[tokio::test]
    async fn dangling_need_is_a_runner_error() {
        let mut tasks = vec![task("d", &["echo", "d"], 0, &["ghost"])];
        let (sink, _rx) = OutputSink::channel();

        let runner = TaskRunner::new(4, BTreeMap::new());
        let err = runner.run(&mut tasks, &sink).await.unwrap_err();
        assert!(matches!(err, CrewError::Runner(_)));
    }

    #[tokio::test]
    async fn action_override_caps_that_action_only() {
        let mut overrides = BTreeMap::new();
        overrides.insert("up".to_string(), 1usize);
        let mut tasks = vec![
            task("a", &["echo", "a"], 0, &[]),
            task("b", &["echo", "b"], 0, &[]),
        ];
        let (sink, _rx) = OutputSink::channel();

        let runner = TaskRunner::new(8, overrides);
        let summary = runner.run(&mut tasks, &sink).await.unwrap();
        assert!(summary.success());
        assert_eq!(summary.completed, 2);
    }
}
