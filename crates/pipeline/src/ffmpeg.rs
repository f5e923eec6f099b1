//! FFmpeg/FFprobe process wrappers.
//!
//! - [`probe_stream`] reads size and frame rate with `ffprobe`.
//! - [`FfmpegSource`] decodes a file or live URL to raw RGB frames on
//!   `ffmpeg`'s stdout.
//! - [`FfmpegEncoder`] pipes raw RGB frames into `ffmpeg`'s stdin and
//!   encodes them to H.264 MP4.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::clip_writer::{ClipEncoder, ClipWriteError, EncoderSession};
use crate::frame::{FrameError, FrameSource, SourceOpener};

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
}

/// Geometry and timing of a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// Run `ffprobe` on a file path or URL.
pub async fn probe_stream(url: &str) -> Result<StreamInfo, FfmpegError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "quiet"]);
    if is_rtsp(url) {
        cmd.args(["-rtsp_transport", "tcp"]);
    }
    let output = cmd
        .args([
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_streams",
        ])
        .arg(url)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probe = serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))?;
    stream_info(&probe).ok_or_else(|| FfmpegError::NoVideoStream(url.to_string()))
}

/// Size and rate of the first video stream, if it reports a usable size.
pub fn stream_info(probe: &FfprobeOutput) -> Option<StreamInfo> {
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().unwrap_or("video") == "video")?;
    let width = stream.width.filter(|w| *w > 0)?;
    let height = stream.height.filter(|h| *h > 0)?;
    let frame_rate = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .map(|s| parse_fraction(s))
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0);
    Some(StreamInfo {
        width,
        height,
        frame_rate,
    })
}

/// Parse a fraction string like `"30/1"` into a float.
pub fn parse_fraction(s: &str) -> f64 {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num = parts[0].parse::<f64>().unwrap_or(0.0);
        let den = parts[1].parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
        return 0.0;
    }
    s.parse::<f64>().unwrap_or(0.0)
}

fn is_rtsp(url: &str) -> bool {
    url.starts_with("rtsp://") || url.starts_with("rtsps://")
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Raw RGB frames decoded by an `ffmpeg` child process.
pub struct FfmpegSource {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    info: StreamInfo,
    frame_bytes: usize,
}

impl FfmpegSource {
    pub async fn open(url: &str) -> Result<Self, FfmpegError> {
        let info = probe_stream(url).await?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-nostdin", "-loglevel", "error"]);
        if is_rtsp(url) {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        let mut child = cmd
            .arg("-i")
            .arg(url)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(FfmpegError::NotFound)?;

        let stdout = child.stdout.take();
        Ok(Self {
            child: Some(child),
            stdout,
            info,
            frame_bytes: info.width as usize * info.height as usize * 3,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    async fn read_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.frame_bytes];
        match stdout.read_exact(&mut buf).await {
            Ok(_) => Ok(RgbImage::from_raw(self.info.width, self.info.height, buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.stdout = None;
                Ok(None)
            }
            Err(e) => Err(FrameError::Read(e.to_string())),
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "ffmpeg decoder already exited");
            }
        }
    }
}

/// [`SourceOpener`] backed by [`FfmpegSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegOpener;

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, FrameError> {
        let source = FfmpegSource::open(url).await.map_err(|e| match e {
            FfmpegError::NotFound(io) => FrameError::Spawn(io),
            other => FrameError::Open {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        Ok(Box::new(source))
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// H.264 MP4 encoder fed through `ffmpeg`'s stdin.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    preset: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            preset: "veryfast".to_string(),
        }
    }
}

struct FfmpegEncoderSession {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_size: (u32, u32),
}

#[async_trait]
impl ClipEncoder for FfmpegEncoder {
    async fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        frame_size: (u32, u32),
    ) -> Result<Box<dyn EncoderSession>, ClipWriteError> {
        let (width, height) = frame_size;
        let mut child = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &format!("{frame_rate:.3}")])
            .args(["-i", "-", "-an", "-c:v", "libx264"])
            .args(["-preset", &self.preset])
            .args(["-pix_fmt", "yuv420p", "-f", "mp4"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClipWriteError::EncoderOpen(format!("spawn ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClipWriteError::EncoderOpen("ffmpeg stdin unavailable".into()))?;

        Ok(Box::new(FfmpegEncoderSession {
            child,
            stdin: Some(stdin),
            frame_size,
        }))
    }
}

#[async_trait]
impl EncoderSession for FfmpegEncoderSession {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), ClipWriteError> {
        if frame.dimensions() != self.frame_size {
            return Err(ClipWriteError::Encode(format!(
                "frame is {:?}, clip is {:?}",
                frame.dimensions(),
                self.frame_size
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ClipWriteError::Encode("encoder input closed".into()))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| ClipWriteError::Encode(e.to_string()))
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ClipWriteError> {
        drop(self.stdin.take());
        let output = self
            .child
            .wait_with_output()
            .await
            .map_err(|e| ClipWriteError::Encode(e.to_string()))?;
        if !output.status.success() {
            return Err(ClipWriteError::Encode(format!(
                "ffmpeg exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
