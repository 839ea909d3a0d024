//! Task data model for the execution graph.
//!
//! Tasks are the atomic units of planned work. Each task names the tool
//! that handles it, carries the instruction for that tool, and tracks its
//! status and dependency edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a task within one plan generation.
///
/// Ids are assigned by the planner (e.g. "step_1") and are stable for the
/// plan's lifetime. A replan mints fresh ids; ids are never reused across
/// generations of the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id from the planner-assigned string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Task status in its lifecycle.
///
/// The status is monotonic within a plan generation. `Superseded` is only
/// applied when a replan archives the plan the task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but not yet dispatched.
    #[default]
    Pending,
    /// Task is currently being executed by its tool.
    Running,
    /// Task completed successfully.
    Done,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was abandoned when a replan replaced its plan.
    Superseded,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Superseded => write!(f, "superseded"),
        }
    }
}

/// A single task in a plan.
///
/// The dependency set is fixed at creation; a replan creates new task
/// objects rather than mutating edges of existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the plan generation.
    pub id: TaskId,
    /// Name of the tool capability that handles this task.
    pub tool: String,
    /// Instruction passed to the tool. May contain `{{task_id}}` references
    /// to prior results, resolved by the scheduler before dispatch.
    pub description: String,
    /// Ids of tasks that must succeed before this one becomes eligible.
    pub depends_on: Vec<TaskId>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with no dependencies.
    pub fn new(id: impl Into<TaskId>, tool: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            tool: tool.to_string(),
            description: description.to_string(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the dependency edges for this task.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Start the task execution.
    ///
    /// Transitions status to Running and records the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as successfully completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Done;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as abandoned by a replan.
    ///
    /// Only non-terminal tasks are superseded; a task that already ran
    /// keeps its outcome for the audit trail.
    pub fn supersede(&mut self) {
        if !self.is_terminal() {
            self.status = TaskStatus::Superseded;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Done | TaskStatus::Failed { .. } | TaskStatus::Superseded
        )
    }

    /// Check if the task is waiting to be dispatched.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }
}
