//! Live output multiplexing for concurrently running tasks.
//!
//! The runner and the per-task line pumps only ever enqueue events on an
//! unbounded channel; a single render task drains the channel and repaints a
//! reserved terminal viewport on a fixed tick. Nothing here feeds back into
//! scheduling decisions.

use std::collections::{BTreeSet, VecDeque};
use std::io::Write;
use std::time::Duration;

use crossterm::{cursor, queue, terminal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::task::{GroupKey, TaskState};

/// Number of recent log lines kept in the viewport ring.
pub const DEFAULT_RING_LINES: usize = 10;

const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum OutputEvent {
    Line { project: String, line: String },
    Started { key: GroupKey },
    Finished { key: GroupKey, state: TaskState },
}

/// Cheap, cloneable handle handed to the runner and every task. All methods
/// only enqueue; they never block and never fail (a closed channel means the
/// display is gone, which is fine).
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl OutputSink {
    /// A sink plus the receiving end, for wiring up a consumer (or a test).
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere.
    pub fn null() -> Self {
        let (sink, _rx) = Self::channel();
        sink
    }

    pub fn line(&self, project: &str, line: &str) {
        let _ = self.tx.send(OutputEvent::Line {
            project: project.to_string(),
            line: line.to_string(),
        });
    }

    pub fn task_started(&self, key: &GroupKey) {
        let _ = self.tx.send(OutputEvent::Started { key: key.clone() });
    }

    pub fn task_finished(&self, key: &GroupKey, state: TaskState) {
        let _ = self.tx.send(OutputEvent::Finished {
            key: key.clone(),
            state,
        });
    }
}

/// Pure view model behind the viewport: the bounded line ring, the set of
/// tasks currently waited on, and the progress counters.
#[derive(Debug)]
pub struct ViewState {
    ring: VecDeque<(String, String)>,
    ring_capacity: usize,
    running: BTreeSet<GroupKey>,
    finished: usize,
    total: usize,
}

impl ViewState {
    pub fn new(total: usize, ring_capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
            running: BTreeSet::new(),
            finished: 0,
            total,
        }
    }

    pub fn apply(&mut self, event: &OutputEvent) {
        match event {
            OutputEvent::Line { project, line } => {
                if self.ring.len() == self.ring_capacity {
                    self.ring.pop_front();
                }
                self.ring.push_back((project.clone(), line.clone()));
            }
            OutputEvent::Started { key } => {
                self.running.insert(key.clone());
            }
            OutputEvent::Finished { key, state: _ } => {
                self.running.remove(key);
                self.finished += 1;
            }
        }
    }

    pub fn status_line(&self) -> String {
        let waiting: Vec<&str> = self
            .running
            .iter()
            .map(|key| key.project.as_str())
            .collect();
        if waiting.is_empty() {
            format!("crew: {}/{} tasks done", self.finished, self.total)
        } else {
            format!(
                "crew: {}/{} tasks done, waiting on {}",
                self.finished,
                self.total,
                waiting.join(", ")
            )
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &(String, String)> {
        self.ring.iter()
    }
}

/// Whether stdout is attached to a terminal; decides viewport vs passthrough.
pub fn stdout_is_tty() -> bool {
    use crossterm::tty::IsTty;
    std::io::stdout().is_tty()
}

/// Tag a log line with its project and truncate to the terminal width.
pub fn format_line(project: &str, line: &str, width: usize) -> String {
    let tagged = format!("[{project}] {line}");
    if tagged.chars().count() <= width {
        tagged
    } else {
        tagged.chars().take(width).collect()
    }
}

/// The live viewport: owns the render task and the event channel.
pub struct LiveOutput {
    sink: OutputSink,
    render_task: JoinHandle<()>,
}

impl LiveOutput {
    /// Spawn the render loop. With `enabled` false (non-TTY, quiet mode,
    /// tests) the channel is still drained but lines are printed as plain
    /// passthrough instead of a repainted viewport.
    pub fn spawn(total_tasks: usize, enabled: bool) -> Self {
        let (sink, rx) = OutputSink::channel();
        let render_task = tokio::spawn(render_loop(rx, total_tasks, enabled));
        Self { sink, render_task }
    }

    pub fn sink(&self) -> OutputSink {
        self.sink.clone()
    }

    /// Close the channel, wait for the final drain, and clear the viewport.
    pub async fn finish(self) {
        drop(self.sink);
        let _ = self.render_task.await;
    }
}

/// Re-shows the cursor no matter how the render loop ends.
struct CursorGuard {
    active: bool,
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if self.active {
            let mut out = std::io::stdout();
            let _ = queue!(out, cursor::Show);
            let _ = out.flush();
        }
    }
}

async fn render_loop(
    mut rx: mpsc::UnboundedReceiver<OutputEvent>,
    total_tasks: usize,
    enabled: bool,
) {
    let mut state = ViewState::new(total_tasks, DEFAULT_RING_LINES);
    let mut painted_lines: u16 = 0;

    let guard = CursorGuard { active: enabled };
    if enabled {
        let mut out = std::io::stdout();
        let _ = queue!(out, cursor::Hide);
        let _ = out.flush();
    }

    let mut tick = tokio::time::interval(REDRAW_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if !enabled {
                            if let OutputEvent::Line { project, line } = &event {
                                println!("[{project}] {line}");
                            }
                        }
                        state.apply(&event);
                    }
                    // Channel closed: the run is over.
                    None => break,
                }
            }
            _ = tick.tick() => {
                if enabled {
                    painted_lines = repaint(&state, painted_lines);
                }
            }
        }
    }

    if enabled {
        clear_viewport(painted_lines);
    }
    drop(guard);
}

fn repaint(state: &ViewState, previously_painted: u16) -> u16 {
    let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
    let mut out = std::io::stdout();

    if previously_painted > 0 {
        let _ = queue!(out, cursor::MoveUp(previously_painted));
    }
    let _ = queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::FromCursorDown)
    );

    let mut painted: u16 = 0;
    let status = state.status_line();
    let status: String = status.chars().take(width).collect();
    let _ = writeln!(out, "{status}");
    painted += 1;

    for (project, line) in state.lines() {
        let _ = writeln!(out, "{}", format_line(project, line, width));
        painted += 1;
    }

    let _ = out.flush();
    painted
}

fn clear_viewport(painted_lines: u16) {
    let mut out = std::io::stdout();
    if painted_lines > 0 {
        let _ = queue!(out, cursor::MoveUp(painted_lines));
    }
    let _ = queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::FromCursorDown),
        cursor::Show
    );
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_to_capacity() {
        let mut state = ViewState::new(1, 3);
        for i in 0..10 {
            state.apply(&OutputEvent::Line {
                project: "p".to_string(),
                line: format!("line {i}"),
            });
        }

        let lines: Vec<_> = state.lines().map(|(_, l)| l.clone()).collect();
        assert_eq!(lines, vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn status_tracks_running_set_and_progress() {
        let mut state = ViewState::new(2, DEFAULT_RING_LINES);
        let key = GroupKey::new("db", "up", "cego.dk");

        state.apply(&OutputEvent::Started { key: key.clone() });
        assert_eq!(state.status_line(), "crew: 0/2 tasks done, waiting on db");

        state.apply(&OutputEvent::Finished {
            key,
            state: TaskState::Completed,
        });
        assert_eq!(state.status_line(), "crew: 1/2 tasks done");
    }

    #[test]
    fn format_line_truncates_to_width() {
        let line = format_line("api", "a very long line of output", 12);
        assert_eq!(line, "[api] a very");
        assert_eq!(format_line("api", "ok", 80), "[api] ok");
    }

    #[tokio::test]
    async fn sink_never_blocks_and_render_loop_drains() {
        let live = LiveOutput::spawn(1, false);
        let sink = live.sink();
        for i in 0..1000 {
            sink.line("p", &format!("{i}"));
        }
        sink.task_started(&GroupKey::new("p", "a", "g"));
        sink.task_finished(&GroupKey::new("p", "a", "g"), TaskState::Completed);
        drop(sink);
        live.finish().await;
    }
}
