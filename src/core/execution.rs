//! Execution records and tool outcomes.
//!
//! An `Execution` is the immutable record of one task having been run:
//! the resolved input actually sent to the tool, the opaque result payload,
//! and the outcome. Executions are append-only within a session and there is
//! at most one per task id per plan generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::task::TaskId;

/// Unique identifier for an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new unique execution identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a tool adapter reports back for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool considers the task done.
    pub success: bool,
    /// Opaque result payload. Not interpreted by the core beyond
    /// reference substitution into later task descriptions.
    pub output: serde_json::Value,
    /// Error message when the tool failed.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome carrying a result payload.
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// A failed outcome carrying an error message.
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.to_string()),
        }
    }
}

/// Immutable record of one task having been run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this record.
    pub id: ExecutionId,
    /// The task this execution satisfies.
    pub task_id: TaskId,
    /// The tool that handled the task.
    pub tool: String,
    /// The resolved input actually sent to the tool, references substituted.
    pub input: String,
    /// Opaque result payload from the tool.
    pub output: serde_json::Value,
    /// Whether the run succeeded.
    pub success: bool,
    /// Error message when the run failed.
    pub error: Option<String>,
    /// When the dispatch started.
    pub started_at: DateTime<Utc>,
    /// When the outcome was recorded.
    pub completed_at: DateTime<Utc>,
}

impl Execution {
    /// Record the outcome of a dispatch that started at `started_at`.
    pub fn record(
        task_id: TaskId,
        tool: &str,
        input: &str,
        outcome: ToolOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            task_id,
            tool: tool.to_string(),
            input: input.to_string(),
            output: outcome.output,
            success: outcome.success,
            error: outcome.error,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Wall-clock duration of the run in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}
