//! Append-only audit trail for turns.
//!
//! Everything the scheduler decides and does is recorded as an event: the
//! run itself, every phase transition, every planner decision, and every
//! execution. The trail exists for debugging and accountability; it is not
//! the live checkpoint, and a sink failure never aborts a turn.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::execution::Execution;
use crate::core::plan::Plan;
use crate::error::{Error, Result};
use crate::session::SessionKey;

/// Unique identifier for one session turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The turn is still in progress.
    Running,
    /// The turn produced a final response.
    Completed,
    /// The turn ended by asking the user a clarification question.
    Clarified,
    /// The turn aborted with an error.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Clarified => write!(f, "clarified"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One record per session turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub session: SessionKey,
    pub user_message: String,
    pub status: RunStatus,
    pub final_response: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Tasks in the final plan generation.
    pub tasks_planned: usize,
    /// Executions recorded during this run.
    pub tasks_executed: usize,
    /// Executions that failed during this run.
    pub tasks_failed: usize,
    /// Replans performed during this run.
    pub replans: u32,
}

impl RunRecord {
    /// Open a run record when a turn starts.
    pub fn started(id: RunId, session: SessionKey, user_message: &str) -> Self {
        Self {
            id,
            session,
            user_message: user_message.to_string(),
            status: RunStatus::Running,
            final_response: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            tasks_planned: 0,
            tasks_executed: 0,
            tasks_failed: 0,
            replans: 0,
        }
    }

    /// Close the record with a final status.
    pub fn finish(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.status = status;
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.completed_at = Some(now);
    }
}

/// One record per phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub run_id: RunId,
    /// Name of the phase entered.
    pub phase: String,
    pub message: String,
    /// Structured payload, e.g. a checker summary or task id.
    pub detail: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(run_id: RunId, phase: &str, message: &str) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            message: message.to_string(),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One record per planner call: the plan as produced, plus rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub run_id: RunId,
    pub plan: Plan,
    pub reasoning: String,
    pub needs_clarification: bool,
    pub at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(run_id: RunId, plan: &Plan) -> Self {
        Self {
            run_id,
            plan: plan.clone(),
            reasoning: plan.reasoning.clone(),
            needs_clarification: plan.needs_clarification,
            at: Utc::now(),
        }
    }
}

/// The events a sink receives, in occurrence order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum AuditEvent {
    RunStarted { record: RunRecord },
    RunFinished { record: RunRecord },
    Transition { record: TransitionRecord },
    PlannerDecision { record: DecisionRecord },
    Execution { run_id: RunId, execution: Execution },
}

/// Append-only destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
}

/// In-memory sink, mainly for tests and introspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// File sink writing one JSON object per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    // Serializes appends so concurrent turns do not interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Audit(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Audit(format!("append {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
