//! REST client for the event configuration service.
//!
//! - `GET  /config?key=<key>&eventId=<event>` returns `{"value": "..."}`.
//! - `PUT  /config` with `{event_id, key, value}` updates a value.
//! - `POST /config` with the same body creates one.
//!
//! A 404 on read falls back to the built-in default and registers it with
//! the service so operators can see and edit it.

use async_trait::async_trait;
use crossline_core::settings::default_value;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::source::ConfigSource;

/// HTTP client scoped to one event.
pub struct HttpConfigSource {
    client: reqwest::Client,
    api_url: String,
    token: String,
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct ConfigValue {
    value: String,
}

#[derive(Debug, Serialize)]
struct ConfigBody<'a> {
    event_id: &'a str,
    key: &'a str,
    value: &'a str,
}

impl HttpConfigSource {
    /// * `api_url` - Base HTTP URL, e.g. `http://photos:8092`.
    pub fn new(api_url: String, token: String, event_id: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token, event_id)
    }

    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        token: String,
        event_id: String,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            event_id,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn create(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let response = self
            .client
            .post(format!("{}/config", self.api_url))
            .bearer_auth(&self.token)
            .json(&ConfigBody {
                event_id: &self.event_id,
                key,
                value,
            })
            .send()
            .await?;
        Self::ensure_success(response).await?;
        tracing::debug!(key, "Config created");
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ConfigError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ConfigError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ConfigError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn get(&self, key: &str) -> Result<String, ConfigError> {
        let response = self
            .client
            .get(format!("{}/config", self.api_url))
            .query(&[("key", key), ("eventId", self.event_id.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let value = default_value(key).ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
            if let Err(e) = self.create(key, value).await {
                tracing::warn!(key, error = %e, "Failed to register default config value");
            }
            return Ok(value.to_string());
        }

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<ConfigValue>().await?.value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let response = self
            .client
            .put(format!("{}/config", self.api_url))
            .bearer_auth(&self.token)
            .json(&ConfigBody {
                event_id: &self.event_id,
                key,
                value,
            })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return self.create(key, value).await;
        }
        Self::ensure_success(response).await?;
        Ok(())
    }
}
