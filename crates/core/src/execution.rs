//! Task execution: the task state machine, the wave-based runner, and the
//! live output multiplexer.

pub mod output;
pub mod runner;
pub mod task;

pub use output::{LiveOutput, OutputEvent, OutputSink};
pub use runner::{RunSummary, TaskRunner};
pub use task::{GroupKey, Task, TaskContext, TaskResult, TaskState};
