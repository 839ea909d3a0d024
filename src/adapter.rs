//! External collaborator interfaces.
//!
//! The scheduler is generic over who plans, who executes, and who writes the
//! final answer. Production wires these to an LLM and a fleet of webhook
//! tools; tests wire them to scripts. The core never interprets what a tool
//! does; it only routes inputs and records outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::execution::{Execution, ToolOutcome};
use crate::core::plan::Plan;
use crate::error::Result;
use crate::session::ChatMessage;

/// Everything the planner sees when producing an initial plan.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    /// The inbound user message for this turn.
    pub user_message: &'a str,
    /// Trailing window of the conversation history.
    pub history: &'a [ChatMessage],
    /// Catalog of registered tool capabilities.
    pub catalog: &'a [ToolSpec],
    /// Current wall-clock time, so plans can reason about dates.
    pub now: DateTime<Utc>,
}

/// Everything the planner sees when routing around a failure.
#[derive(Debug, Clone)]
pub struct ReplanRequest<'a> {
    pub user_message: &'a str,
    pub history: &'a [ChatMessage],
    pub catalog: &'a [ToolSpec],
    /// The plan that failed or blocked, statuses included.
    pub plan: &'a Plan,
    /// Every execution recorded this session, failed ones included.
    pub executions: &'a [Execution],
    pub now: DateTime<Utc>,
}

/// What a replan call decides.
#[derive(Debug, Clone)]
pub enum ReplanDecision {
    /// A revised plan that routes around the failure. Task ids must be fresh.
    Revised(Plan),
    /// The goal cannot be met; respond with what actually happened.
    Abandon {
        /// Why the planner gave up.
        reason: String,
    },
}

/// Produces plans from conversation context.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the initial plan for a turn.
    async fn plan(&self, request: PlanRequest<'_>) -> Result<Plan>;

    /// Produce a revised plan after failures, or abandon.
    async fn replan(&self, request: ReplanRequest<'_>) -> Result<ReplanDecision>;
}

/// Everything the responder sees when writing the final answer.
///
/// Deliberately excludes unexecuted task descriptions: the answer is built
/// from what actually ran, so it cannot claim actions that did not happen.
#[derive(Debug, Clone)]
pub struct RespondRequest<'a> {
    pub user_message: &'a str,
    pub history: &'a [ChatMessage],
    /// Every recorded execution of this turn, in order.
    pub executions: &'a [Execution],
    /// The final plan with task statuses.
    pub plan: &'a Plan,
}

/// Produces the final user-facing response for a turn.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: RespondRequest<'_>) -> Result<String>;
}

/// Performs the work of one task.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool against the resolved input.
    ///
    /// Transport-level errors may be returned as `Err`; the scheduler
    /// absorbs them into failed outcomes so they route to replanning
    /// instead of aborting the turn.
    async fn execute(&self, input: &str) -> Result<ToolOutcome>;
}

/// Catalog entry describing one tool capability to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Capability name, referenced by `Task::tool`.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Short capability bullets for the planner prompt.
    pub capabilities: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Registry of tool executors keyed by capability name.
///
/// The registry also owns the catalog handed to the planner, so a plan can
/// only be accepted when every task's tool is actually registered.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    catalog: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its spec's name.
    ///
    /// Re-registering a name replaces the executor and its catalog entry.
    pub fn register(&mut self, spec: ToolSpec, executor: Arc<dyn ToolExecutor>) {
        self.catalog.retain(|s| s.name != spec.name);
        self.executors.insert(spec.name.clone(), executor);
        self.catalog.push(spec);
    }

    /// Look up the executor for a tool name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Check whether a tool name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// The catalog in registration order.
    pub fn catalog(&self) -> &[ToolSpec] {
        &self.catalog
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.catalog.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}
