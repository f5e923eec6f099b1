//! The shared pool of clips awaiting detection.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use crossline_core::lock::{unix_now, LockRecord};

use crate::error::StorageError;
use crate::layout::KeyLayout;
use crate::store::ObjectStore;

/// One crossing image to upload.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub folder: String,
    pub file_name: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: Vec<(String, String)>,
}

/// Capability interface over the clip backlog. Implementations are picked
/// once at startup.
#[async_trait]
pub trait Backlog: ObjectStore {
    fn layout(&self) -> &KeyLayout;

    /// File names of pending clips, oldest first. Temp files and lock
    /// objects are never returned.
    async fn list_pending(&self) -> Result<Vec<String>, StorageError>;

    /// Location the tracker can open the pending clip from.
    async fn source_url(&self, clip: &str) -> Result<String, StorageError>;

    /// Move a processed clip to the archive folder.
    async fn archive(&self, clip: &str) -> Result<(), StorageError>;

    /// Move a clip that could not be opened to the error folder.
    async fn quarantine(&self, clip: &str) -> Result<(), StorageError>;

    /// Store an artifact and return its URL.
    async fn upload_artifact(&self, artifact: Artifact) -> Result<String, StorageError>;

    /// Hand a finished local clip file to the backlog as pending. Returns
    /// the clip's storage key.
    async fn publish_clip(&self, local_path: &Path) -> Result<String, StorageError>;

    /// Storage key of the lock guarding `clip`.
    fn lock_key(&self, clip: &str) -> String {
        self.layout().lock_key(clip)
    }

    /// First pending clip not in `exclude` whose lock is absent or stale.
    ///
    /// A lock that cannot be read or parsed counts as held.
    async fn next_unlocked(
        &self,
        exclude: &HashSet<String>,
        timeout: Duration,
    ) -> Result<Option<String>, StorageError> {
        for clip in self.list_pending().await? {
            if exclude.contains(&clip) {
                continue;
            }
            let lock_key = self.lock_key(&clip);
            match self.read(&lock_key).await {
                Err(StorageError::NotFound(_)) => return Ok(Some(clip)),
                Err(e) => {
                    tracing::debug!(clip = %clip, error = %e, "Lock unreadable, treating as held");
                }
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    match LockRecord::parse(&text) {
                        Ok(record) if record.is_stale(unix_now(), timeout) => {
                            return Ok(Some(clip));
                        }
                        Ok(record) => {
                            tracing::debug!(clip = %clip, holder = %record.holder_id, "Clip locked");
                        }
                        Err(e) => {
                            tracing::debug!(clip = %clip, error = %e, "Lock unparsable, treating as held");
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}
