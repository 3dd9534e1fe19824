use thiserror::Error;

/// The main error type for Crew operations
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cyclic needs for action '{action}':\n{residual}")]
    Cycle { action: String, residual: String },

    #[error("Action '{action}' of project '{project}' declares both 'priority' and 'needs'")]
    PriorityNeedsConflict { project: String, action: String },

    #[error("Project '{0}' is not declared in the configuration")]
    UnknownProject(String),

    #[error("No tasks found for the selection '{0}'")]
    EmptySelection(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("{0}")]
    Startup(String),
}

/// Result type alias for Crew operations
pub type CrewResult<T> = Result<T, CrewError>;
