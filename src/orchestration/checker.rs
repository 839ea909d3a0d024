//! The checking step: a pure function from state to the next move.
//!
//! Runs after planning and after every task completion. No side effects,
//! no I/O: just the task statuses and recorded executions in, a verdict
//! out, so the whole transition table is testable in isolation.

use crate::core::execution::Execution;
use crate::core::plan::Plan;
use crate::core::resolver::{readiness, Readiness};

/// What the scheduler should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every task completed successfully; produce the final response.
    AllDone,
    /// A task is ready; keep executing.
    HasPending,
    /// A task failed, or pending tasks are blocked; route to replanning.
    NeedsReplan,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::AllDone => write!(f, "all_done"),
            Verdict::HasPending => write!(f, "has_pending"),
            Verdict::NeedsReplan => write!(f, "needs_replan"),
        }
    }
}

/// Evaluate the plan against recorded executions.
///
/// Order matters:
/// 1. all tasks done: respond
/// 2. any task failed: replan
/// 3. a task is ready: execute
/// 4. otherwise pending tasks are blocked: replan, never stall
pub fn evaluate(plan: &Plan, executions: &[Execution]) -> Verdict {
    if plan.all_done() {
        return Verdict::AllDone;
    }

    if plan.any_failed() {
        return Verdict::NeedsReplan;
    }

    match readiness(&plan.tasks, executions) {
        Readiness::Ready(_) => Verdict::HasPending,
        // All terminal but not all done means superseded leftovers; a
        // validated active plan never gets here, but blocked must replan.
        Readiness::AllTerminal | Readiness::Blocked => Verdict::NeedsReplan,
    }
}

/// A short human-readable summary of why the verdict was reached.
///
/// Used for transition audit records and logs.
pub fn summarize(plan: &Plan) -> String {
    format!(
        "{} done, {} pending, {} failed",
        plan.done_count(),
        plan.pending_count(),
        plan.failed_count()
    )
}
