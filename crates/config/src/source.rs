use async_trait::async_trait;
use crossline_core::settings::{parse_bool, parse_f64, parse_u64, render_bool};

use crate::error::ConfigError;

/// String-keyed configuration for one event.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, ConfigError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;

    async fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(parse_bool(&self.get(key).await?))
    }

    async fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        Ok(parse_f64(key, &self.get(key).await?)?)
    }

    async fn get_u64(&self, key: &str) -> Result<u64, ConfigError> {
        Ok(parse_u64(key, &self.get(key).await?)?)
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<(), ConfigError> {
        self.set(key, render_bool(value)).await
    }
}
