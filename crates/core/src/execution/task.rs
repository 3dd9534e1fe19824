//! The unit of work: a `(project, action, group)` command with its state
//! machine and process execution.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::output::OutputSink;

/// Canonical identity of a task. A value type: all set/map membership and
/// removal is by the derived `project/action/group` key, never by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub project: String,
    pub action: String,
    pub group: String,
}

impl GroupKey {
    pub fn new(
        project: impl Into<String>,
        action: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            action: action.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.action, self.group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on unresolved needs.
    Blocked,
    /// Eligible to launch.
    Pending,
    Running,
    Completed,
    Failed,
    /// Same `(cwd, cmd)` pair already launched earlier in the run.
    SkippedDuplicate,
    /// A direct or transitive need failed.
    SkippedFailedDependency,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed
                | TaskState::SkippedDuplicate
                | TaskState::SkippedFailedDependency
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Blocked => "blocked",
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::SkippedDuplicate => "skipped (duplicate)",
            TaskState::SkippedFailedDependency => "skipped (failed dependency)",
        };
        f.write_str(label)
    }
}

/// Everything needed to spawn the task's process.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub cwd: PathBuf,
    pub cmd: Vec<String>,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runtime entity created by the planner, driven by the runner. Retained
/// until the run ends for summary and log purposes.
#[derive(Debug, Clone)]
pub struct Task {
    pub key: GroupKey,
    pub context: TaskContext,
    pub needs: Vec<GroupKey>,
    pub state: TaskState,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(key: GroupKey, context: TaskContext, needs: Vec<GroupKey>) -> Self {
        let state = if needs.is_empty() {
            TaskState::Pending
        } else {
            TaskState::Blocked
        };
        Self {
            key,
            context,
            needs,
            state,
            result: None,
        }
    }

    /// Key used to avoid re-running identical commands within one run.
    pub fn dedup_key(&self) -> (PathBuf, String) {
        (self.context.cwd.clone(), self.context.cmd.join(" "))
    }
}

/// Spawn the task's command and stream its output line by line into `sink`.
///
/// Never returns an error: launch failures (missing executable, permission
/// denied) degrade to a synthetic result with exit code 127, handled
/// identically to any other failing command.
pub async fn run_command(key: &GroupKey, context: &TaskContext, sink: &OutputSink) -> TaskResult {
    let started_at = Utc::now();

    let Some((program, args)) = context.cmd.split_first() else {
        return launch_failure(started_at, "empty command vector".to_string());
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&context.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return launch_failure(started_at, e.to_string()),
    };

    let stdout_task = child
        .stdout
        .take()
        .map(|r| pump_lines(r, key.project.clone(), sink.clone()));
    let stderr_task = child
        .stderr
        .take()
        .map(|r| pump_lines(r, key.project.clone(), sink.clone()));

    let status = child.wait().await;
    let stdout = join_capture(stdout_task).await;
    let stderr = join_capture(stderr_task).await;
    let finished_at = Utc::now();

    match status {
        Ok(status) => TaskResult {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
            signal: signal_of(&status),
            started_at,
            finished_at,
        },
        Err(e) => TaskResult {
            stdout,
            stderr: format!("{stderr}{e}\n"),
            exit_code: 127,
            signal: None,
            started_at,
            finished_at,
        },
    }
}

fn launch_failure(started_at: DateTime<Utc>, message: String) -> TaskResult {
    TaskResult {
        stdout: String::new(),
        stderr: format!("{message}\n"),
        exit_code: 127,
        signal: None,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Forward each line to the sink tagged with the project name and capture the
/// full stream for the task result.
fn pump_lines<R>(reader: R, project: String, sink: OutputSink) -> JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.line(&project, &line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

async fn join_capture(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::output::OutputEvent;

    fn context(cmd: &[&str]) -> TaskContext {
        TaskContext {
            cwd: std::env::temp_dir(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_streams_lines() {
        let (sink, mut rx) = OutputSink::channel();
        let key = GroupKey::new("example", "up", "cego.dk");

        let result = run_command(&key, &context(&["echo", "hello"]), &sink).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert_eq!(result.stdout, "hello\n");
        assert!(result.finished_at >= result.started_at);

        drop(sink);
        let mut streamed = Vec::new();
        while let Some(event) = rx.recv().await {
            if let OutputEvent::Line { project, line } = event {
                streamed.push((project, line));
            }
        }
        assert_eq!(streamed, vec![("example".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let (sink, _rx) = OutputSink::channel();
        let key = GroupKey::new("example", "up", "cego.dk");

        let result = run_command(
            &key,
            &context(&["sh", "-c", "echo oops >&2; exit 3"]),
            &sink,
        )
        .await;

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn launch_failure_degrades_to_synthetic_result() {
        let (sink, _rx) = OutputSink::channel();
        let key = GroupKey::new("example", "up", "cego.dk");

        let result = run_command(&key, &context(&["definitely-not-a-binary-xyz"]), &sink).await;

        assert_eq!(result.exit_code, 127);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn empty_command_is_a_launch_failure() {
        let (sink, _rx) = OutputSink::channel();
        let key = GroupKey::new("example", "up", "cego.dk");

        let result = run_command(&key, &context(&[]), &sink).await;
        assert_eq!(result.exit_code, 127);
    }

    #[tokio::test]
    async fn cancelling_a_running_command_returns_promptly() {
        // Dropping the in-flight future must not wait out the child; the
        // child is killed on drop instead.
        let (sink, _rx) = OutputSink::channel();
        let key = GroupKey::new("example", "up", "cego.dk");

        let started = std::time::Instant::now();
        let ctx = context(&["sleep", "5"]);
        tokio::select! {
            _ = run_command(&key, &ctx, &sink) => {
                panic!("command should not finish before the cancel branch");
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn group_key_compares_structurally() {
        let a = GroupKey::new("p", "a", "g");
        let b = GroupKey::new("p", "a", "g");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "p/a/g");
    }

    #[test]
    fn new_task_starts_blocked_only_with_needs() {
        let key = GroupKey::new("p", "a", "g");
        let ctx = context(&["true"]);

        let free = Task::new(key.clone(), ctx.clone(), Vec::new());
        assert_eq!(free.state, TaskState::Pending);

        let gated = Task::new(key, ctx, vec![GroupKey::new("q", "a", "g")]);
        assert_eq!(gated.state, TaskState::Blocked);
    }
}
