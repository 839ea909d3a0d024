//! Plan model and structural validation.
//!
//! A plan is the ordered set of tasks produced by one planner call, plus the
//! planner's rationale. Insertion order is significant: it is the tie-breaker
//! the readiness resolver uses when several tasks are eligible at once, which
//! keeps execution order deterministic for a given plan.

use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};

/// The active set of tasks for one session turn.
///
/// A session holds exactly one active plan at a time; replanning replaces it
/// wholesale and archives the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Tasks in planner insertion order.
    pub tasks: Vec<Task>,
    /// Why the planner chose this plan.
    pub reasoning: String,
    /// Set when the planner needs more input before anything can run.
    pub needs_clarification: bool,
    /// The question to send back to the user when clarification is needed.
    pub clarification_question: Option<String>,
    /// When the plan was produced.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a plan from tasks and the planner's reasoning.
    pub fn new(tasks: Vec<Task>, reasoning: &str) -> Self {
        Self {
            tasks,
            reasoning: reasoning.to_string(),
            needs_clarification: false,
            clarification_question: None,
            created_at: Utc::now(),
        }
    }

    /// Create a clarification plan: no tasks, just a question for the user.
    pub fn clarification(question: &str) -> Self {
        Self {
            tasks: Vec::new(),
            reasoning: String::new(),
            needs_clarification: true,
            clarification_question: Some(question.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Look up a task mutably by id.
    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// All task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// True when every task completed successfully.
    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    /// True when any task failed.
    pub fn any_failed(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Failed { .. }))
    }

    pub fn done_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_pending()).count()
    }

    /// Mark every non-terminal task as superseded.
    ///
    /// Called when a replan replaces this plan; terminal tasks keep their
    /// outcome for the audit trail.
    pub fn supersede_remaining(&mut self) {
        for task in &mut self.tasks {
            task.supersede();
        }
    }

    /// Validate the plan's structure.
    ///
    /// Checks, in order:
    /// - a non-clarification plan must contain at least one task
    /// - every tool name must be non-empty
    /// - task ids must be unique within the plan
    /// - every dependency must name a task in the plan
    /// - the dependency graph must be acyclic
    ///
    /// Cycle errors name every task id on the offending cycle.
    pub fn validate(&self) -> Result<()> {
        if self.needs_clarification {
            // Nothing will be executed; structure is irrelevant.
            return Ok(());
        }

        if self.tasks.is_empty() {
            return Err(Error::EmptyPlan);
        }

        let mut seen: HashSet<&TaskId> = HashSet::new();
        for task in &self.tasks {
            if task.tool.trim().is_empty() {
                return Err(Error::UnknownTool {
                    task: task.id.clone(),
                    tool: task.tool.clone(),
                });
            }
            if !seen.insert(&task.id) {
                return Err(Error::DuplicateTaskId {
                    id: task.id.clone(),
                });
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep) {
                    return Err(Error::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    /// Detect dependency cycles with a strongly-connected-components pass.
    fn check_acyclic(&self) -> Result<()> {
        let mut graph: DiGraph<&TaskId, ()> = DiGraph::new();
        let mut index: HashMap<&TaskId, NodeIndex> = HashMap::new();

        for task in &self.tasks {
            let node = graph.add_node(&task.id);
            index.insert(&task.id, node);
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                // dep -> task: the dependency must run first
                graph.add_edge(index[dep], index[&task.id], ());
            }
        }

        for component in tarjan_scc(&graph) {
            let is_cycle = component.len() > 1
                || graph.find_edge(component[0], component[0]).is_some();
            if is_cycle {
                let mut ids: Vec<String> = component
                    .iter()
                    .map(|node| graph[*node].to_string())
                    .collect();
                ids.sort();
                // Close the loop for readability: a -> b -> a
                if let Some(first) = ids.first().cloned() {
                    ids.push(first);
                }
                return Err(Error::CyclicDependency { ids });
            }
        }

        Ok(())
    }
}
