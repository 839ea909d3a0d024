pub mod adapter;
pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod session;
pub mod store;
pub mod template;

pub use adapter::{
    PlanRequest, Planner, ReplanDecision, ReplanRequest, RespondRequest, Responder, ToolExecutor,
    ToolRegistry, ToolSpec,
};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{Scheduler, TurnPhase};
pub use session::{ChatMessage, ChatRole, Session, SessionKey, TurnOutcome};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
