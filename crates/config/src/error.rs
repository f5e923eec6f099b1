use crossline_core::error::CoreError;

/// Errors from the configuration layer.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Key unknown to the service and without a built-in default.
    #[error("Config key not found: {0}")]
    NotFound(String),

    #[error("Config service rejected credentials")]
    Unauthorized,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Config service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid config value: {0}")]
    Invalid(#[from] CoreError),
}
