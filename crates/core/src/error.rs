#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid clip name: {0}")]
    InvalidClipName(String),

    #[error("Invalid lock record: {0}")]
    InvalidLockRecord(String),
}
