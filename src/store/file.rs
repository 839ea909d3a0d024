//! File-backed checkpoint store: one JSON snapshot per session key.
//!
//! Writes go to a temporary file first and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact. Rename within one
//! directory is atomic on POSIX filesystems.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::CheckpointStore;
use crate::error::{Error, Result};
use crate::session::{Session, SessionKey};
use crate::rlog_debug;

/// Stores each session as `<dir>/<key>.json`.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Checkpoint(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn temp_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", key))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, session: &Session) -> Result<()> {
        let path = self.snapshot_path(&session.key);
        let temp = self.temp_path(&session.key);

        let payload = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&temp, &payload)
            .await
            .map_err(|e| Error::Checkpoint(format!("write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| Error::Checkpoint(format!("rename {}: {}", path.display(), e)))?;

        rlog_debug!(
            "checkpoint saved session={} version={} path={}",
            session.key,
            session.version,
            path.display()
        );
        Ok(())
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        let path = self.snapshot_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Checkpoint(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let session: Session = serde_json::from_slice(&bytes)?;
        Ok(Some(session))
    }
}
