//! Checkpoint persistence for session snapshots.
//!
//! The scheduler checkpoints the whole session after every phase transition.
//! Saves are atomic at snapshot granularity and treated as blocking: a turn
//! must not advance past a transition it could not durably record, or a
//! resume could silently replay side-effecting tasks.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{Session, SessionKey};

/// Durable storage of whole-session snapshots, keyed by session.
///
/// Implementations never interpret the snapshot; they only round-trip it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot, replacing any previous one for the same key.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Load the latest snapshot for a key, if one exists.
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>>;
}
