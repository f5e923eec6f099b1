//! Capture Loop: read a live source into fixed-length segments and hand
//! each segment to the Clip Writer without waiting for it.
//!
//! ```text
//! idle -> capturing -> (segment boundary) -> capturing -> ... -> stopped
//! ```
//!
//! A segment ends after `frames_per_clip` source frames, or early when
//! `max_consecutive_errors` reads in a row fail. Each early end counts
//! against `max_errors`; exhausting it stops capture. Between segments the
//! `CAPTURE_VIDEO_SERVICE_START` flag is re-read and capture stops when it
//! is cleared. Every exit path closes the source and joins all outstanding
//! writes.

use std::sync::Arc;

use chrono::Utc;
use crossline_config::{ConfigError, ConfigSource};
use crossline_core::clip::ClipName;
use crossline_core::settings::{CaptureSettings, CAPTURE_VIDEO_SERVICE_START};
use futures::future::join_all;
use image::RgbImage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clip_writer::{ClipBatch, ClipWriteError, ClipWriter};
use crate::frame::{FrameError, FrameSource, SourceOpener};

/// Errors that prevent a capture session from starting.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Video source unavailable: {0}")]
    SourceOpen(#[from] FrameError),

    #[error("Capture settings unavailable: {0}")]
    Config(#[from] ConfigError),
}

/// Why a capture session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The start flag was cleared.
    StopRequested,
    /// Too many failure bursts.
    ErrorBudgetExhausted,
    /// The service is shutting down.
    Cancelled,
    /// The continuation flag could not be read.
    ConfigUnavailable(String),
}

/// Outcome of one capture session.
#[derive(Debug)]
pub struct CaptureReport {
    /// Segments handed to the writer.
    pub clips_started: u64,
    /// Storage keys of clips that were written and published.
    pub clips_written: Vec<String>,
    /// Segments cut short by consecutive read failures.
    pub error_bursts: u32,
    pub write_errors: Vec<ClipWriteError>,
    pub stop_reason: StopReason,
    pub source_fps: f64,
    pub output_fps: f64,
}

/// How a segment's read phase ended.
enum SegmentEnd {
    Full,
    ErrorBurst,
    Cancelled,
}

pub struct CaptureLoop {
    opener: Arc<dyn SourceOpener>,
    writer: Arc<ClipWriter>,
    config: Arc<dyn ConfigSource>,
}

impl CaptureLoop {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        writer: Arc<ClipWriter>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            opener,
            writer,
            config,
        }
    }

    /// Run one capture session until stopped.
    pub async fn run(
        &self,
        settings: &CaptureSettings,
        cancel: CancellationToken,
    ) -> Result<CaptureReport, CaptureError> {
        let mut source = self.opener.open(&settings.video_url).await?;

        let report = self.capture(source.as_mut(), settings, &cancel).await;
        source.close().await;

        let report = report.await_writes().await;
        tracing::info!(
            clips = report.clips_written.len(),
            error_bursts = report.error_bursts,
            write_errors = report.write_errors.len(),
            stop_reason = ?report.stop_reason,
            "Capture finished"
        );
        Ok(report)
    }

    async fn capture(
        &self,
        source: &mut dyn FrameSource,
        settings: &CaptureSettings,
        cancel: &CancellationToken,
    ) -> PendingReport {
        let probed_fps = source.frame_rate();
        let source_fps = settings.source_fps(probed_fps);
        if source_fps != probed_fps {
            tracing::warn!(probed_fps, source_fps, "Source reports no usable frame rate, assuming one");
        }
        let frame_size = source.frame_size();
        let stride = settings.decimation_stride(source_fps);
        let frames_per_clip = settings.frames_per_clip(source_fps);
        let output_fps = settings.effective_fps(source_fps);

        tracing::info!(
            url = %settings.video_url,
            source_fps,
            output_fps,
            stride,
            frames_per_clip,
            "Initiating video capture"
        );

        let mut pending = PendingReport {
            handles: Vec::new(),
            error_bursts: 0,
            stop_reason: StopReason::StopRequested,
            source_fps,
            output_fps,
        };
        let mut sequence: u64 = 0;

        loop {
            let started_at = Utc::now();
            let mut frames: Vec<RgbImage> = Vec::new();
            let end =
                read_segment(source, settings, frames_per_clip, stride, cancel, &mut frames).await;

            if !frames.is_empty() {
                let batch = ClipBatch {
                    name: ClipName::new(started_at, sequence, settings.container.clone()),
                    frames,
                    frame_rate: output_fps,
                    frame_size,
                };
                tracing::debug!(clip = %batch.name.file_name(), frames = batch.frames.len(), "Segment captured");
                pending.handles.push(self.writer.spawn(batch));
                sequence += 1;
            }

            match end {
                SegmentEnd::Cancelled => {
                    pending.stop_reason = StopReason::Cancelled;
                    break;
                }
                SegmentEnd::ErrorBurst => {
                    pending.error_bursts += 1;
                    tracing::error!(
                        error_bursts = pending.error_bursts,
                        max_errors = settings.max_errors,
                        "Maximum consecutive read errors reached"
                    );
                    if pending.error_bursts >= settings.max_errors {
                        pending.stop_reason = StopReason::ErrorBudgetExhausted;
                        break;
                    }
                }
                SegmentEnd::Full => {}
            }

            match self.config.get_bool(CAPTURE_VIDEO_SERVICE_START).await {
                Ok(true) => {}
                Ok(false) => {
                    pending.stop_reason = StopReason::StopRequested;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cannot read capture start flag, stopping");
                    pending.stop_reason = StopReason::ConfigUnavailable(e.to_string());
                    break;
                }
            }
        }

        pending
    }
}

/// Read one segment's worth of source frames into `frames`, keeping every
/// `stride`-th one.
async fn read_segment(
    source: &mut dyn FrameSource,
    settings: &CaptureSettings,
    frames_per_clip: u64,
    stride: u64,
    cancel: &CancellationToken,
    frames: &mut Vec<RgbImage>,
) -> SegmentEnd {
    let mut read: u64 = 0;
    let mut consecutive_errors: u32 = 0;

    while read < frames_per_clip {
        let result = tokio::select! {
            _ = cancel.cancelled() => return SegmentEnd::Cancelled,
            result = source.read_frame() => result,
        };

        match result {
            Ok(Some(frame)) => {
                if read % stride == 0 {
                    frames.push(frame);
                }
                read += 1;
                consecutive_errors = 0;
            }
            Ok(None) => {
                consecutive_errors += 1;
                tracing::debug!(consecutive_errors, "No frame available");
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(consecutive_errors, error = %e, "Frame read failed");
            }
        }

        if consecutive_errors >= settings.max_consecutive_errors {
            return SegmentEnd::ErrorBurst;
        }
    }
    SegmentEnd::Full
}

/// Capture results before the background writes are joined.
struct PendingReport {
    handles: Vec<JoinHandle<Result<String, ClipWriteError>>>,
    error_bursts: u32,
    stop_reason: StopReason,
    source_fps: f64,
    output_fps: f64,
}

impl PendingReport {
    async fn await_writes(self) -> CaptureReport {
        let clips_started = self.handles.len() as u64;
        if clips_started > 0 {
            tracing::info!(count = clips_started, "Waiting for background clip writes");
        }

        let mut clips_written = Vec::new();
        let mut write_errors = Vec::new();
        for result in join_all(self.handles).await {
            match result {
                Ok(Ok(key)) => clips_written.push(key),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Clip write failed");
                    write_errors.push(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Clip write task failed");
                    write_errors.push(ClipWriteError::TaskPanicked(e.to_string()));
                }
            }
        }

        CaptureReport {
            clips_started,
            clips_written,
            error_bursts: self.error_bursts,
            write_errors,
            stop_reason: self.stop_reason,
            source_fps: self.source_fps,
            output_fps: self.output_fps,
        }
    }
}
