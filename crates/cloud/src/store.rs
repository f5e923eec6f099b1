//! Object primitives the lock is built on.

use async_trait::async_trait;

use crate::error::StorageError;

/// An object's body and a token naming this exact version of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub body: Vec<u8>,
    pub version: String,
}

/// Minimal object-store surface with an atomic conditional create.
///
/// `create_if_absent` must be all-or-nothing with respect to concurrent
/// callers: when two callers race on the same key exactly one succeeds and
/// the other gets [`StorageError::AlreadyExists`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_if_absent(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] when the object is missing.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Read an object with the version token [`ObjectStore::delete_if_version`]
    /// checks against.
    async fn read_versioned(&self, key: &str) -> Result<Versioned, StorageError>;

    /// Succeeds when the object is already gone.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete the object only while it is still at `version`.
    ///
    /// Fails with [`StorageError::Changed`] when the object was replaced and
    /// [`StorageError::NotFound`] when it is gone. A replaced object is left
    /// in place.
    async fn delete_if_version(&self, key: &str, version: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}
