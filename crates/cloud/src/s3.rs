//! S3-compatible object-storage backlog.
//!
//! Conditional create uses `PutObject` with `If-None-Match: *`; the store
//! answers `412 Precondition Failed` (or `409` while a concurrent create is
//! in flight) when the key already exists. Conditional delete sends the
//! ETag read earlier as `If-Match`. Stores that ignore either header
//! degrade the lock to advisory.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use crossline_core::clip::{is_lock_name, is_temp_name, ClipName};

use crate::backlog::{Artifact, Backlog};
use crate::error::StorageError;
use crate::layout::{file_name, KeyLayout};
use crate::store::{ObjectStore, Versioned};

/// Validity of presigned clip URLs handed to the tracker.
const PRESIGN_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Public endpoint used in artifact URLs when no custom endpoint is set.
const DEFAULT_PUBLIC_ENDPOINT: &str = "https://s3.amazonaws.com";

const HTTP_NOT_FOUND: u16 = 404;
const HTTP_CONFLICT: u16 = 409;
const HTTP_PRECONDITION_FAILED: u16 = 412;

/// Connection settings for [`S3Backlog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    /// Custom endpoint (MinIO, GCS interoperability, ...).
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct S3Backlog {
    client: Client,
    bucket: String,
    public_endpoint: String,
    layout: KeyLayout,
}

impl S3Backlog {
    /// Build a client from the ambient AWS configuration (env, profile,
    /// instance metadata) plus `settings`.
    pub async fn connect(settings: S3Settings, layout: KeyLayout) -> Result<Self, StorageError> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::Config("S3 bucket must not be empty".into()));
        }
        let shared = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self::with_client(client, settings, layout))
    }

    pub fn with_client(client: Client, settings: S3Settings, layout: KeyLayout) -> Self {
        let public_endpoint = settings
            .endpoint_url
            .unwrap_or_else(|| DEFAULT_PUBLIC_ENDPOINT.to_string());
        Self {
            client,
            bucket: settings.bucket,
            public_endpoint: public_endpoint.trim_end_matches('/').to_string(),
            layout,
        }
    }

    /// `{endpoint}/{bucket}/{key}`
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.public_endpoint, self.bucket)
    }

    async fn move_object(&self, from: &str, to: &str) -> Result<(), StorageError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{from}", self.bucket))
            .key(to)
            .send()
            .await
            .map_err(|e| {
                if e.code() == Some("NoSuchKey") {
                    StorageError::NotFound(from.to_string())
                } else {
                    backend_error("copy_object", e)
                }
            })?;
        self.delete(from).await
    }
}

fn backend_error<E, R>(operation: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = match err.message() {
        Some(message) => format!("{}: {message}", err.code().unwrap_or("unknown")),
        None => err.to_string(),
    };
    StorageError::Backend(format!("{operation} failed: {detail}"))
}

#[async_trait]
impl ObjectStore for S3Backlog {
    async fn create_if_absent(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let lost = matches!(status, Some(HTTP_PRECONDITION_FAILED | HTTP_CONFLICT))
                    || matches!(e.code(), Some("PreconditionFailed" | "ConditionalRequestConflict"));
                if lost {
                    Err(StorageError::AlreadyExists(key.to_string()))
                } else {
                    Err(backend_error("put_object", e))
                }
            }
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        Ok(self.read_versioned(key).await?.body)
    }

    async fn read_versioned(&self, key: &str) -> Result<Versioned, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    backend_error("get_object", e)
                }
            })?;
        let version = output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend(format!("get_object returned no ETag for {key}")))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("get_object body: {e}")))?;
        Ok(Versioned {
            body: bytes.into_bytes().to_vec(),
            version,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("delete_object", e))?;
        Ok(())
    }

    async fn delete_if_version(&self, key: &str, version: &str) -> Result<(), StorageError> {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .if_match(version)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if status == Some(HTTP_PRECONDITION_FAILED) || e.code() == Some("PreconditionFailed") {
                    Err(StorageError::Changed(key.to_string()))
                } else if status == Some(HTTP_NOT_FOUND) || e.code() == Some("NoSuchKey") {
                    Err(StorageError::NotFound(key.to_string()))
                } else {
                    Err(backend_error("delete_object", e))
                }
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(backend_error("head_object", e)),
        }
    }
}

#[async_trait]
impl Backlog for S3Backlog {
    fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    async fn list_pending(&self) -> Result<Vec<String>, StorageError> {
        let prefix = self.layout.pending_prefix();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        let mut clips = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| backend_error("list_objects_v2", e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(name) = key.strip_prefix(&prefix) else { continue };
                if name.contains('/') || is_temp_name(name) || is_lock_name(name) {
                    continue;
                }
                if ClipName::parse(name).is_ok() {
                    clips.push(name.to_string());
                }
            }
        }
        clips.sort();
        Ok(clips)
    }

    async fn source_url(&self, clip: &str) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(PRESIGN_EXPIRY)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.layout.pending_key(clip))
            .presigned(presigning)
            .await
            .map_err(|e| backend_error("presign get_object", e))?;
        Ok(request.uri().to_string())
    }

    async fn archive(&self, clip: &str) -> Result<(), StorageError> {
        self.move_object(&self.layout.pending_key(clip), &self.layout.archive_key(clip))
            .await
    }

    async fn quarantine(&self, clip: &str) -> Result<(), StorageError> {
        self.move_object(&self.layout.pending_key(clip), &self.layout.error_key(clip))
            .await
    }

    async fn upload_artifact(&self, artifact: Artifact) -> Result<String, StorageError> {
        let key = self.layout.key(&artifact.folder, &artifact.file_name);
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(artifact.content_type)
            .body(ByteStream::from(artifact.body));
        for (name, value) in artifact.metadata {
            request = request.metadata(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| backend_error("put_object", e))?;
        Ok(self.public_url(&key))
    }

    async fn publish_clip(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::NotFound(local_path.display().to_string()))?;
        let key = self.layout.pending_key(&name);
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Backend(format!("read {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("video/mp4")
            .body(body)
            .send()
            .await
            .map_err(|e| backend_error("put_object", e))?;

        if let Err(e) = tokio::fs::remove_file(local_path).await {
            tracing::warn!(path = %local_path.display(), error = %e, "Failed to remove uploaded clip");
        }
        tracing::debug!(clip = %file_name(&key), bucket = %self.bucket, "Clip uploaded to backlog");
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> Client {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        Client::from_conf(conf)
    }

    #[test]
    fn public_url_with_custom_endpoint() {
        let backlog = S3Backlog::with_client(
            offline_client(),
            S3Settings {
                bucket: "clips".into(),
                endpoint_url: Some("http://minio:9000/".into()),
                force_path_style: true,
            },
            KeyLayout::new("ev1"),
        );
        assert_eq!(
            backlog.public_url("ev1/DETECT/a.jpg"),
            "http://minio:9000/clips/ev1/DETECT/a.jpg"
        );
    }

    #[test]
    fn public_url_defaults_to_aws() {
        let backlog = S3Backlog::with_client(
            offline_client(),
            S3Settings {
                bucket: "clips".into(),
                ..Default::default()
            },
            KeyLayout::new("ev1"),
        );
        assert_eq!(
            backlog.public_url("k"),
            "https://s3.amazonaws.com/clips/k"
        );
    }

    #[tokio::test]
    async fn connect_rejects_empty_bucket() {
        let result = S3Backlog::connect(S3Settings::default(), KeyLayout::new("ev1")).await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
