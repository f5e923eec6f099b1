//! In-process configuration, for tests and single-node runs.

use std::collections::HashMap;

use async_trait::async_trait;
use crossline_core::settings::default_value;
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::source::ConfigSource;

/// Map-backed [`ConfigSource`] falling back to built-in defaults.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Stored value only, ignoring defaults.
    pub async fn stored(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn get(&self, key: &str) -> Result<String, ConfigError> {
        if let Some(value) = self.values.read().await.get(key) {
            return Ok(value.clone());
        }
        default_value(key)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
