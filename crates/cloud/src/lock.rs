//! Lease-based claims on shared resources.
//!
//! A claim is an object at `<resource>.lock` created with the store's
//! atomic create-if-absent. Claims older than the configured timeout may be
//! reclaimed by any worker.
//!
//! Reclaiming deletes the stale lock only while it is still the exact
//! version judged stale, so a worker that judged it stale late cannot
//! remove the lock another worker has just reclaimed.
//!
//! Release is not fenced: a holder that outlives its lease and later
//! releases will delete whichever lock is present, including one a
//! different worker reclaimed in the meantime.

use std::sync::Arc;

use crossline_core::clip::lock_path;
use crossline_core::lock::{unix_now, LockConfig, LockRecord};

use crate::error::StorageError;
use crate::store::ObjectStore;

/// Default holder id: `instance-<pid>-<random>`.
pub fn default_holder_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("instance-{}-{}", std::process::id(), &suffix[..8])
}

pub struct DistributedLock<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    holder_id: String,
    config: LockConfig,
}

impl<S: ObjectStore + ?Sized> DistributedLock<S> {
    pub fn new(store: Arc<S>, holder_id: impl Into<String>, config: LockConfig) -> Self {
        Self {
            store,
            holder_id: holder_id.into(),
            config,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn config(&self) -> LockConfig {
        self.config
    }

    /// Try to claim `resource`. Returns `false` when another holder has a
    /// live claim or the store fails.
    pub async fn try_acquire(&self, resource: &str) -> bool {
        let key = lock_path(resource);

        match self.create(&key).await {
            Ok(()) => {
                tracing::debug!(resource, holder = %self.holder_id, "Lock acquired");
                return true;
            }
            Err(StorageError::AlreadyExists(_)) => {}
            Err(e) => {
                tracing::error!(resource, error = %e, "Lock create failed");
                return false;
            }
        }

        let Some(version) = self.stale_version(&key).await else {
            tracing::debug!(resource, "Lock held by another worker");
            return false;
        };

        tracing::warn!(resource, holder = %self.holder_id, "Reclaiming stale lock");
        match self.store.delete_if_version(&key, &version).await {
            Ok(()) => {}
            // Another worker is mid-reclaim or already reclaimed.
            Err(StorageError::NotFound(_) | StorageError::Changed(_)) => {
                tracing::debug!(resource, "Stale lock taken over before reclaim");
                return false;
            }
            Err(e) => {
                tracing::error!(resource, error = %e, "Failed to delete stale lock");
                return false;
            }
        }

        match self.create(&key).await {
            Ok(()) => {
                tracing::info!(resource, holder = %self.holder_id, "Stale lock reclaimed");
                true
            }
            Err(StorageError::AlreadyExists(_)) => {
                tracing::debug!(resource, "Lost stale lock reclaim race");
                false
            }
            Err(e) => {
                tracing::error!(resource, error = %e, "Lock create failed after reclaim");
                false
            }
        }
    }

    /// Drop the claim on `resource`. Best effort; a missing lock is fine.
    pub async fn release(&self, resource: &str) {
        let key = lock_path(resource);
        match self.store.delete(&key).await {
            Ok(()) => tracing::debug!(resource, holder = %self.holder_id, "Lock released"),
            Err(e) => tracing::warn!(resource, error = %e, "Lock release failed"),
        }
    }

    async fn create(&self, key: &str) -> Result<(), StorageError> {
        let record = LockRecord::now(self.holder_id.clone());
        self.store
            .create_if_absent(key, record.render().into_bytes())
            .await
    }

    /// Version of the lock at `key` if it holds an expired record. Anything
    /// other than a readable, parsable, expired record is fresh.
    async fn stale_version(&self, key: &str) -> Option<String> {
        let object = match self.store.read_versioned(key).await {
            Ok(object) => object,
            Err(e) => {
                tracing::debug!(key, error = %e, "Cannot read lock, assuming fresh");
                return None;
            }
        };
        match LockRecord::parse(&String::from_utf8_lossy(&object.body)) {
            Ok(record) if record.is_stale(unix_now(), self.config.timeout) => Some(object.version),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Unparsable lock, assuming fresh");
                None
            }
        }
    }
}
