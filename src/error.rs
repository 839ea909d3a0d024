use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("Plan contains no tasks")]
    EmptyPlan,

    #[error("Duplicate task id in plan: {id}")]
    DuplicateTaskId { id: TaskId },

    #[error("Task id {id} was already executed in an earlier plan generation")]
    ReusedTaskId { id: TaskId },

    #[error("Task {task} depends on {dependency}, which is not in the plan")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Dependency cycle among tasks: {}", .ids.join(" -> "))]
    CyclicDependency { ids: Vec<String> },

    #[error("Task {task} names unknown tool: {tool}")]
    UnknownTool { task: TaskId, tool: String },

    #[error("Task {task} references '{reference}', which matches no successful execution")]
    UnresolvedReference { task: TaskId, reference: String },

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Corrupt session snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Audit sink error: {0}")]
    Audit(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Replan limit exceeded ({limit} replans)")]
    ReplanLimitExceeded { limit: u32 },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, Error>;
