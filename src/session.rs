//! Durable session state.
//!
//! A session is the per-user continuity unit: conversation history, the
//! active plan, the append-only execution log, and the current turn phase.
//! The scheduler is the only mutator; the checkpoint store reads and writes
//! whole snapshots and never interprets them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::audit::RunId;
use crate::core::execution::Execution;
use crate::core::plan::Plan;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::phase::TurnState;

const MAX_SESSION_KEY_LENGTH: usize = 64;

/// Snapshot schema version, bumped on incompatible layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Stable identifier for a session, supplied by the caller.
///
/// Typically the end-user id of the chat platform. Keys become file names in
/// the file checkpoint store, so they are restricted to a filesystem-safe
/// character set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Create a session key, validating the character set.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_session_key(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_session_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidSessionKey("key is empty".to_string()));
    }
    if key.len() > MAX_SESSION_KEY_LENGTH {
        return Err(Error::InvalidSessionKey(format!(
            "key exceeds {} characters",
            MAX_SESSION_KEY_LENGTH
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(Error::InvalidSessionKey(format!(
            "key '{}' contains characters outside [A-Za-z0-9-_.@]",
            key
        )));
    }
    Ok(())
}

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: ChatRole::User,
            content: content.to_string(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.to_string(),
            at: Utc::now(),
        }
    }
}

/// What a completed turn hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The final answer, grounded in recorded executions.
    Response(String),
    /// A question for the user; nothing was executed.
    Clarification(String),
}

impl TurnOutcome {
    /// The outgoing text, whichever kind it is.
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Response(text) => text,
            TurnOutcome::Clarification(text) => text,
        }
    }

    pub fn is_clarification(&self) -> bool {
        matches!(self, TurnOutcome::Clarification(_))
    }
}

/// The whole durable state for one session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Snapshot schema version.
    pub snapshot_version: u32,
    /// The key this session is stored under.
    pub key: SessionKey,
    /// Monotonic counter, bumped on every checkpoint.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Full conversation, append-only.
    pub history: Vec<ChatMessage>,
    /// The inbound message of the current turn.
    pub user_message: String,
    /// Run id of the current turn, for audit correlation.
    pub run_id: Option<RunId>,
    /// Phase state of the current turn.
    pub turn: Option<TurnState>,
    /// The active plan, if the current turn has one.
    pub plan: Option<Plan>,
    /// Superseded plans, kept for audit only.
    pub archived_plans: Vec<Plan>,
    /// Every execution ever recorded for this session, append-only.
    pub executions: Vec<Execution>,
    /// Replans performed in the current turn.
    pub retry_count: u32,
    /// The current turn's final response, once set.
    pub final_response: Option<String>,
}

impl Session {
    /// Create a fresh session for a key.
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            snapshot_version: SNAPSHOT_VERSION,
            key,
            version: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            user_message: String::new(),
            run_id: None,
            turn: None,
            plan: None,
            archived_plans: Vec::new(),
            executions: Vec::new(),
            retry_count: 0,
            final_response: None,
        }
    }

    /// True while a turn is underway (checkpointed mid-run).
    pub fn turn_in_progress(&self) -> bool {
        self.turn.as_ref().map(TurnState::in_progress).unwrap_or(false)
    }

    /// Start a new turn for an inbound message.
    ///
    /// Archives the previous turn's plan, clears per-turn state, and appends
    /// the message to the history.
    pub fn begin_turn(&mut self, run_id: RunId, user_message: &str) {
        if let Some(mut old) = self.plan.take() {
            old.supersede_remaining();
            self.archived_plans.push(old);
        }
        self.user_message = user_message.to_string();
        self.run_id = Some(run_id);
        self.turn = Some(TurnState::new());
        self.retry_count = 0;
        self.final_response = None;
        self.history.push(ChatMessage::user(user_message));
    }

    /// Replace the active plan during a replan.
    ///
    /// The old plan's non-terminal tasks are superseded and the plan is
    /// archived for audit.
    pub fn replace_plan(&mut self, new_plan: Plan) {
        if let Some(mut old) = self.plan.take() {
            old.supersede_remaining();
            self.archived_plans.push(old);
        }
        self.plan = Some(new_plan);
    }

    /// Close the current turn after a fatal error.
    ///
    /// The plan is archived with its unfinished tasks superseded, and the
    /// turn state is dropped so the next message starts a fresh turn.
    pub fn abort_turn(&mut self) {
        if let Some(mut plan) = self.plan.take() {
            plan.supersede_remaining();
            self.archived_plans.push(plan);
        }
        self.turn = None;
    }

    /// Append an execution record.
    pub fn record_execution(&mut self, execution: Execution) {
        self.executions.push(execution);
    }

    /// Ids of every task executed in any plan generation of this session.
    pub fn executed_ids(&self) -> HashSet<&TaskId> {
        self.executions.iter().map(|e| &e.task_id).collect()
    }

    /// Executions recorded for the current run.
    pub fn run_executions(&self) -> Vec<&Execution> {
        match self.run_id {
            Some(_) => {
                // Executions are append-only; those belonging to the current
                // turn are exactly the ones for tasks of the active or
                // archived-in-this-turn generations. The cheap, correct way
                // to scope them is the turn start boundary.
                self.executions
                    .iter()
                    .filter(|e| e.started_at >= self.turn_started_at())
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn turn_started_at(&self) -> DateTime<Utc> {
        self.turn
            .as_ref()
            .and_then(|t| t.phase_history().first().map(|entry| entry.entered_at))
            .unwrap_or(self.created_at)
    }

    /// The trailing `window` messages of the conversation.
    pub fn history_window(&self, window: usize) -> &[ChatMessage] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    /// Record the assistant's outgoing message.
    pub fn push_assistant(&mut self, content: &str) {
        self.history.push(ChatMessage::assistant(content));
    }

    /// Bump the snapshot version ahead of a checkpoint.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
