//! Filesystem backlog.
//!
//! Keys map to paths under a root directory. The conditional create uses
//! `O_CREAT | O_EXCL`, which is atomic on local filesystems.
//!
//! An object's version is its content. A conditional delete first renames
//! the object to a unique tombstone, so no other caller can see or remove
//! it, then compares the content and restores the object if it changed.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crossline_core::clip::{is_lock_name, is_temp_name, ClipName};
use tokio::io::AsyncWriteExt;

use crate::backlog::{Artifact, Backlog};
use crate::error::StorageError;
use crate::layout::{file_name, KeyLayout, ARCHIVE_FOLDER, CAPTURE_FOLDER, ERROR_FOLDER};
use crate::store::{ObjectStore, Versioned};

/// Suffix of the JSON sidecar holding an artifact's metadata.
const METADATA_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct LocalBacklog {
    root: PathBuf,
    layout: KeyLayout,
}

impl LocalBacklog {
    pub fn new(root: impl Into<PathBuf>, layout: KeyLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an object key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn folder_path(&self, folder: &str) -> PathBuf {
        self.root.join(self.layout.event_id()).join(folder)
    }

    async fn move_clip(&self, clip: &str, folder: &str) -> Result<(), StorageError> {
        let from = self.path_for(&self.layout.pending_key(clip));
        let dir = self.folder_path(folder);
        tokio::fs::create_dir_all(&dir).await?;
        rename_or_copy(&from, &dir.join(clip)).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(clip.to_string()),
            _ => StorageError::Io(e),
        })
    }
}

/// `<path>.<uuid>.reclaim`, next to `path`.
fn tombstone_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}.reclaim", uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

/// `rename`, falling back to copy + remove across filesystems.
async fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

#[async_trait]
impl ObjectStore for LocalBacklog {
    async fn create_if_absent(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(key.to_string()),
                _ => StorageError::Io(e),
            })?;
        file.write_all(&body).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
                _ => StorageError::Io(e),
            })
    }

    async fn read_versioned(&self, key: &str) -> Result<Versioned, StorageError> {
        let body = self.read(key).await?;
        let version = String::from_utf8_lossy(&body).into_owned();
        Ok(Versioned { body, version })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete_if_version(&self, key: &str, version: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tombstone = tombstone_path(&path);
        tokio::fs::rename(&path, &tombstone)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
                _ => StorageError::Io(e),
            })?;

        let body = tokio::fs::read(&tombstone).await;
        if matches!(&body, Ok(body) if String::from_utf8_lossy(body) == version) {
            tokio::fs::remove_file(&tombstone).await?;
            return Ok(());
        }

        // Not ours to delete. `hard_link` never overwrites a newer object.
        match tokio::fs::hard_link(&tombstone, &path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(key, "Object recreated while restoring it, keeping the newer one");
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        tokio::fs::remove_file(&tombstone).await?;
        body?;
        Err(StorageError::Changed(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }
}

#[async_trait]
impl Backlog for LocalBacklog {
    fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    async fn list_pending(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.folder_path(CAPTURE_FOLDER);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut clips = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temp_name(&name) || is_lock_name(&name) {
                continue;
            }
            if ClipName::parse(&name).is_err() {
                tracing::debug!(file = %name, "Ignoring non-clip file in backlog");
                continue;
            }
            clips.push(name);
        }
        clips.sort();
        Ok(clips)
    }

    async fn source_url(&self, clip: &str) -> Result<String, StorageError> {
        let path = self.path_for(&self.layout.pending_key(clip));
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(clip.to_string()));
        }
        Ok(path.to_string_lossy().into_owned())
    }

    async fn archive(&self, clip: &str) -> Result<(), StorageError> {
        self.move_clip(clip, ARCHIVE_FOLDER).await
    }

    async fn quarantine(&self, clip: &str) -> Result<(), StorageError> {
        self.move_clip(clip, ERROR_FOLDER).await
    }

    async fn upload_artifact(&self, artifact: Artifact) -> Result<String, StorageError> {
        let key = self.layout.key(&artifact.folder, &artifact.file_name);
        let path = self.path_for(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &artifact.body).await?;

        if !artifact.metadata.is_empty() {
            let mut sidecar = serde_json::Map::new();
            sidecar.insert("content_type".into(), artifact.content_type.clone().into());
            for (k, v) in &artifact.metadata {
                sidecar.insert(k.clone(), v.clone().into());
            }
            let body = serde_json::to_vec_pretty(&sidecar)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let mut sidecar_path = path.clone().into_os_string();
            sidecar_path.push(METADATA_SUFFIX);
            tokio::fs::write(PathBuf::from(sidecar_path), body).await?;
        }

        Ok(path.to_string_lossy().into_owned())
    }

    async fn publish_clip(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::NotFound(local_path.display().to_string()))?;
        let key = self.layout.pending_key(&name);
        let dest = self.path_for(&key);
        if dest != local_path {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            rename_or_copy(local_path, &dest).await?;
        }
        tracing::debug!(clip = %file_name(&key), "Clip published to local backlog");
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
