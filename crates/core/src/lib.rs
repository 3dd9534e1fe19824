//! Crew Core Library
//!
//! This is the core library for the Crew multi-repository action runner. It
//! orchestrates external commands ("actions") across many independently
//! checked-out repositories ("projects"), honoring cross-project dependencies
//! and coarse priority tiers while running as much work in parallel as
//! possible.
//!
//! ## Architecture
//!
//! The core library is organized into several modules:
//!
//! - [`graph`] - Per-action dependency graph construction and cycle detection
//! - [`planner`] - Selection-to-task planning with dependency closure
//! - [`execution`] - The task state machine, wave-based runner, and live
//!   output multiplexer
//! - [`startup`] - Sequential pre-run commands
//! - [`logs`] - Per-task log files written after a run
//! - [`configs`] - Configuration parsing for projects and actions
//! - [`project_dir`] - Remote-to-checkout-directory resolution
//! - [`types`] - Common error types and type aliases
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crew_core::configs::load_config;
//! use crew_core::execution::{LiveOutput, TaskRunner};
//! use crew_core::graph::build_action_graphs;
//! use crew_core::planner::{plan, Selection};
//!
//! # async fn example() -> crew_core::types::CrewResult<()> {
//! let config = load_config(std::path::Path::new("crew.yml"))?;
//! build_action_graphs(&config)?;
//!
//! let selection = Selection::parse("up", "cego.dk", "*");
//! let mut tasks = plan(&config, &selection)?;
//!
//! let live = LiveOutput::spawn(tasks.len(), true);
//! let summary = TaskRunner::from_config(&config)
//!     .run(&mut tasks, &live.sink())
//!     .await?;
//! live.finish().await;
//! assert!(summary.success());
//! # Ok(())
//! # }
//! ```

pub mod configs;
pub mod execution;
pub mod graph;
pub mod logs;
pub mod planner;
pub mod project_dir;
pub mod startup;
pub mod types;

// Re-export the main types for easier usage
pub use execution::{GroupKey, RunSummary, Task, TaskRunner, TaskState};
pub use types::{CrewError, CrewResult};
