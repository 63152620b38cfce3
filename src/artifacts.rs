//! Ephemeral on-disk artifacts produced while serving a request.
//!
//! Every artifact lives directly under the store root as
//! `<uuid>_<role>` (or `<uuid>_<style>_generated`). Identifiers are fresh v4
//! UUIDs and files are opened with `create_new`, so concurrent requests never
//! address each other's files.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::Style;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Artifact storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ArtifactError::NotFound(path.display().to_string())
        } else {
            ArtifactError::Io { path: path.to_path_buf(), source }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    Original,
    Normalized,
    Generated(Style),
}

impl ArtifactRole {
    fn file_suffix(self) -> String {
        match self {
            ArtifactRole::Original => "original".to_string(),
            ArtifactRole::Normalized => "normalized".to_string(),
            ArtifactRole::Generated(style) => format!("{}_generated", style),
        }
    }
}

/// Opaque reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub id: Uuid,
    pub role: ArtifactRole,
    pub created_at: DateTime<Utc>,
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reserves a fresh identifier for `role`. Nothing is written yet, so the
    /// caller can record the handle before any bytes reach storage.
    fn allocate(&self, role: ArtifactRole) -> ArtifactHandle;

    /// Persists `bytes` at a handle from [`ArtifactStore::allocate`]. Fails if
    /// the handle was already written.
    async fn write(&self, handle: &ArtifactHandle, bytes: &[u8]) -> Result<(), ArtifactError>;

    async fn read(&self, handle: &ArtifactHandle) -> Result<Vec<u8>, ArtifactError>;

    /// Best-effort removal. Failures are logged, never returned.
    async fn delete(&self, handle: &ArtifactHandle);

    /// Deletes every artifact older than `max_age` and returns how many were removed.
    async fn sweep(&self, max_age: Duration) -> Result<usize, ArtifactError>;
}

/// Filesystem-backed store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens the store, creating the root directory if it is missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| ArtifactError::Io { path: root.clone(), source: e })?;
        debug!(root = %root.display(), "Artifact store ready");
        Ok(Self { root })
    }

    /// `Some(true)` if the entry was removed, `Some(false)` if removal was due
    /// but failed, `None` if nothing was due.
    async fn sweep_entry(&self, path: &Path, now: SystemTime, max_age: Duration) -> Option<bool> {
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat artifact during sweep");
                return Some(false);
            }
        };

        let stored_at = match meta.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Artifact has no modification time");
                return Some(false);
            }
        };
        // A timestamp in the future counts as age zero.
        let age = now.duration_since(stored_at).unwrap_or_default();
        if age <= max_age {
            return None;
        }

        match fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), age_secs = age.as_secs(), "🧹 Cleaned up old artifact");
                Some(true)
            }
            // Already removed by the request that owned it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove old artifact");
                Some(false)
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn allocate(&self, role: ArtifactRole) -> ArtifactHandle {
        let id = Uuid::new_v4();
        let path = self.root.join(format!("{}_{}", id, role.file_suffix()));
        ArtifactHandle { id, role, created_at: Utc::now(), path }
    }

    async fn write(&self, handle: &ArtifactHandle, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = &handle.path;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| ArtifactError::Io { path: path.clone(), source: e })?;
        file.write_all(bytes).await.map_err(|e| ArtifactError::Io { path: path.clone(), source: e })?;
        file.flush().await.map_err(|e| ArtifactError::Io { path: path.clone(), source: e })?;

        debug!(id = %handle.id, role = ?handle.role, size = bytes.len(), "Artifact written");
        Ok(())
    }

    async fn read(&self, handle: &ArtifactHandle) -> Result<Vec<u8>, ArtifactError> {
        fs::read(&handle.path).await.map_err(|e| ArtifactError::io(&handle.path, e))
    }

    async fn delete(&self, handle: &ArtifactHandle) {
        match fs::remove_file(&handle.path).await {
            Ok(()) => debug!(id = %handle.id, role = ?handle.role, "Artifact deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(id = %handle.id, "Artifact already gone")
            }
            Err(e) => warn!(path = %handle.path.display(), error = %e, "Error cleaning up artifact"),
        }
    }

    async fn sweep(&self, max_age: Duration) -> Result<usize, ArtifactError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| ArtifactError::io(&self.root, e))?;
        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Failed to list artifacts");
                    break;
                }
            };
            if self.sweep_entry(&entry.path(), now, max_age).await == Some(true) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Artifact sweep finished");
        }
        Ok(removed)
    }
}
