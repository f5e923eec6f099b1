//! Clip Writer: encode a batch of frames to `TMP_<clip>`, then rename to
//! `<clip>` and publish it to the backlog.
//!
//! Writes run as independent tokio tasks so capture continues while a
//! segment is encoded. A failed encoder open never leaves a final-named
//! file behind; a failed rename leaves the temp file for inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use crossline_cloud::backlog::Backlog;
use crossline_cloud::error::StorageError;
use crossline_core::clip::{ClipName, TEMP_PREFIX};
use image::RgbImage;
use tokio::task::JoinHandle;

/// Errors writing one clip.
#[derive(Debug, thiserror::Error)]
pub enum ClipWriteError {
    #[error("Encoder failed to open: {0}")]
    EncoderOpen(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Rename {temp} -> {target} failed: {source}")]
    Rename {
        temp: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },

    #[error("Publishing clip failed: {0}")]
    Publish(#[from] StorageError),

    #[error("Clip writer task panicked: {0}")]
    TaskPanicked(String),
}

// ---------------------------------------------------------------------------
// Encoder seam
// ---------------------------------------------------------------------------

/// Opens an encoding session writing to `path`.
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    async fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        frame_size: (u32, u32),
    ) -> Result<Box<dyn EncoderSession>, ClipWriteError>;
}

#[async_trait]
pub trait EncoderSession: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), ClipWriteError>;

    /// Flush and close the output file.
    async fn finish(self: Box<Self>) -> Result<(), ClipWriteError>;
}

// ---------------------------------------------------------------------------
// write_clip
// ---------------------------------------------------------------------------

/// Temp path next to `final_path`: same directory, `TMP_` prefix.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("{TEMP_PREFIX}{name}"))
}

/// Encode `frames` into `final_path` through a temp file.
pub async fn write_clip(
    encoder: &dyn ClipEncoder,
    frames: &[RgbImage],
    frame_rate: f64,
    frame_size: (u32, u32),
    final_path: &Path,
) -> Result<(), ClipWriteError> {
    let temp_path = temp_path_for(final_path);

    let mut session = match encoder.open(&temp_path, frame_rate, frame_size).await {
        Ok(session) => session,
        Err(e) => {
            remove_quietly(&temp_path).await;
            return Err(e);
        }
    };

    for frame in frames {
        if let Err(e) = session.write_frame(frame).await {
            drop(session);
            remove_quietly(&temp_path).await;
            return Err(e);
        }
    }
    if let Err(e) = session.finish().await {
        remove_quietly(&temp_path).await;
        return Err(e);
    }

    if let Err(source) = tokio::fs::rename(&temp_path, final_path).await {
        tracing::error!(
            temp = %temp_path.display(),
            target = %final_path.display(),
            error = %source,
            "Clip rename failed, temp file kept"
        );
        return Err(ClipWriteError::Rename {
            temp: temp_path,
            target: final_path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp clip");
        }
    }
}

// ---------------------------------------------------------------------------
// ClipWriter
// ---------------------------------------------------------------------------

/// One finished capture segment.
#[derive(Debug)]
pub struct ClipBatch {
    pub name: ClipName,
    pub frames: Vec<RgbImage>,
    pub frame_rate: f64,
    pub frame_size: (u32, u32),
}

/// Encodes segments into a staging directory and publishes them.
pub struct ClipWriter {
    encoder: Arc<dyn ClipEncoder>,
    staging_dir: PathBuf,
    backlog: Arc<dyn Backlog>,
}

impl ClipWriter {
    pub fn new(
        encoder: Arc<dyn ClipEncoder>,
        staging_dir: impl Into<PathBuf>,
        backlog: Arc<dyn Backlog>,
    ) -> Self {
        Self {
            encoder,
            staging_dir: staging_dir.into(),
            backlog,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Write and publish one batch. Returns the clip's storage key.
    pub async fn write(&self, batch: ClipBatch) -> Result<String, ClipWriteError> {
        let file_name = batch.name.file_name();
        let final_path = self.staging_dir.join(&file_name);
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| ClipWriteError::EncoderOpen(format!("staging dir: {e}")))?;

        write_clip(
            self.encoder.as_ref(),
            &batch.frames,
            batch.frame_rate,
            batch.frame_size,
            &final_path,
        )
        .await?;

        let key = self.backlog.publish_clip(&final_path).await?;
        tracing::info!(clip = %file_name, frames = batch.frames.len(), "Saved video clip");
        Ok(key)
    }

    /// Run [`write`](Self::write) as a background task.
    pub fn spawn(self: &Arc<Self>, batch: ClipBatch) -> JoinHandle<Result<String, ClipWriteError>> {
        let writer = Arc::clone(self);
        tokio::spawn(async move { writer.write(batch).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_sits_next_to_final() {
        let path = Path::new("/data/ev1/CAPTURE/CAPTURED_20241217_101500_1.mp4");
        assert_eq!(
            temp_path_for(path),
            PathBuf::from("/data/ev1/CAPTURE/TMP_CAPTURED_20241217_101500_1.mp4")
        );
    }
}
