//! Readiness resolution over the task graph.
//!
//! A task is eligible when it is pending and every dependency has a
//! successful execution on record. Among eligible tasks, plan insertion
//! order decides, so execution order is deterministic for a given plan, which
//! matters both for testability and for reference substitution.
//!
//! The tri-state [`Readiness`] distinguishes "a task is ready" from "all
//! tasks are terminal" from "pending tasks remain but none can run". The
//! last case (blocked) means a failed dependency or a graph defect and must
//! route to replanning, never a silent stall.

use std::collections::HashSet;

use crate::core::execution::Execution;
use crate::core::task::{Task, TaskId};

/// Result of evaluating the task graph against recorded executions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<'a> {
    /// A task is eligible for dispatch.
    Ready(&'a Task),
    /// Every task reached a terminal state.
    AllTerminal,
    /// Pending tasks remain, but none has all dependencies satisfied.
    Blocked,
}

/// Ids of tasks with a successful execution on record.
pub fn completed_ids(executions: &[Execution]) -> HashSet<&TaskId> {
    executions
        .iter()
        .filter(|e| e.success)
        .map(|e| &e.task_id)
        .collect()
}

/// The next eligible task in plan insertion order, if any.
///
/// Idempotent: unchanged inputs yield the same task.
pub fn next_ready<'a>(tasks: &'a [Task], executions: &[Execution]) -> Option<&'a Task> {
    let completed = completed_ids(executions);

    tasks.iter().find(|task| {
        task.is_pending() && task.depends_on.iter().all(|dep| completed.contains(dep))
    })
}

/// Full readiness evaluation of the graph.
pub fn readiness<'a>(tasks: &'a [Task], executions: &[Execution]) -> Readiness<'a> {
    if let Some(task) = next_ready(tasks, executions) {
        return Readiness::Ready(task);
    }
    if tasks.iter().all(|t| t.is_terminal()) {
        return Readiness::AllTerminal;
    }
    Readiness::Blocked
}
