//! Frame sources for the capture loop and the tracker.

use async_trait::async_trait;
use image::RgbImage;

/// Errors reading raster frames from a video source.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Cannot open video source {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("Frame read failed: {0}")]
    Read(String),

    /// The decoder program could not be started at all.
    #[error("Cannot start decoder: {0}")]
    Spawn(std::io::Error),
}

/// A sequential video source yielding RGB frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Native frame rate reported by the source.
    fn frame_rate(&self) -> f64;

    /// `(width, height)` of every frame.
    fn frame_size(&self) -> (u32, u32);

    /// Next frame. `Ok(None)` means no frame was available (end of stream
    /// or a dropped packet); callers decide how many of those to tolerate.
    async fn read_frame(&mut self) -> Result<Option<RgbImage>, FrameError>;

    /// Release the underlying handle. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens [`FrameSource`]s by URL.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, FrameError>;
}
