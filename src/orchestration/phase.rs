//! Turn phase management with transition validation.
//!
//! A turn moves through a fixed set of phases. The transition table is
//! explicit and exhaustive so the control flow of the scheduler can be
//! tested in isolation from any I/O:
//!
//! ```text
//! Planning ──► Checking ──► Executing ──► (back to Checking)
//!    │             │    └──► Replanning ──► Checking | Responding
//!    │             └───────► Responding ──► Complete
//!    └───────────► Clarifying ──► Complete
//! ```
//!
//! Planning → Clarifying is the only edge that bypasses Checking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Phases of a single session turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// The planner is producing the task list.
    Planning,
    /// Deciding what happens next based on task and execution state.
    Checking,
    /// Dispatching exactly one ready task.
    Executing,
    /// The planner is routing around a failure.
    Replanning,
    /// Asking the user for more input; terminal for this turn.
    Clarifying,
    /// Producing the final response from recorded executions.
    Responding,
    /// The turn is finished.
    Complete,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnPhase::Planning => write!(f, "planning"),
            TurnPhase::Checking => write!(f, "checking"),
            TurnPhase::Executing => write!(f, "executing"),
            TurnPhase::Replanning => write!(f, "replanning"),
            TurnPhase::Clarifying => write!(f, "clarifying"),
            TurnPhase::Responding => write!(f, "responding"),
            TurnPhase::Complete => write!(f, "complete"),
        }
    }
}

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: TurnPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the current phase of a turn and enforces valid transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    phase: TurnPhase,
    phase_history: Vec<PhaseHistoryEntry>,
}

impl TurnState {
    /// Start a new turn in the Planning phase.
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Planning,
            phase_history: vec![PhaseHistoryEntry {
                phase: TurnPhase::Planning,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target phase is valid from the current phase.
    pub fn can_transition(&self, target: TurnPhase) -> bool {
        matches!(
            (self.phase, target),
            (TurnPhase::Planning, TurnPhase::Checking)
                | (TurnPhase::Planning, TurnPhase::Clarifying)
                | (TurnPhase::Checking, TurnPhase::Executing)
                | (TurnPhase::Checking, TurnPhase::Responding)
                | (TurnPhase::Checking, TurnPhase::Replanning)
                | (TurnPhase::Executing, TurnPhase::Checking)
                | (TurnPhase::Replanning, TurnPhase::Checking)
                | (TurnPhase::Replanning, TurnPhase::Responding)
                | (TurnPhase::Responding, TurnPhase::Complete)
                | (TurnPhase::Clarifying, TurnPhase::Complete)
        )
    }

    /// Attempt to transition the turn to a new phase.
    ///
    /// Returns an error if the transition is not in the table above.
    pub fn transition(&mut self, target: TurnPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    /// The current phase.
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// True while the turn has not reached Complete.
    pub fn in_progress(&self) -> bool {
        self.phase != TurnPhase::Complete
    }

    /// History of all phases entered, in order.
    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}
