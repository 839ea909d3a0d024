//! Orchestration layer: the turn state machine and its scheduler.
//!
//! `phase` holds the explicit transition table, `checker` the pure
//! state-to-verdict function, and `scheduler` the loop that wires both to
//! the planner, tool, responder, and checkpoint adapters.

pub mod checker;
pub mod phase;
pub mod scheduler;

pub use checker::{evaluate, Verdict};
pub use phase::{PhaseHistoryEntry, TurnPhase, TurnState};
pub use scheduler::Scheduler;
