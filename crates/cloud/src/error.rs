#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Conditional create lost: the object was already there.
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    /// Conditional delete lost: the object is no longer the version read.
    #[error("Object changed since it was read: {0}")]
    Changed(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}
