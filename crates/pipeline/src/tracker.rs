//! Object tracker interface.
//!
//! The tracking model is an external component. Per frame it yields the
//! frame image and a set of boxes, each with a class, a confidence and a
//! track id that is stable across frames of one clip.
//!
//! [`SubprocessTracker`] runs a tracker command that prints one JSON line
//! per frame on stdout:
//!
//! ```text
//! {"frame": 1, "boxes": [{"id": 3, "cls": 0, "conf": 0.87, "xyxyn": [0.41, 0.22, 0.52, 0.61]}]}
//! ```
//!
//! while the frames themselves are decoded from the same source with
//! ffmpeg.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use crossline_core::geometry::NormBox;
use crossline_core::types::{FrameIndex, TrackId};
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::ffmpeg::FfmpegOpener;
use crate::frame::{FrameError, FrameSource, SourceOpener};

/// Lines of tracker stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Errors from the tracking stage.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The clip could not be opened at all.
    #[error("Video stream not found: {0}")]
    StreamNotFound(String),

    #[error("Tracker protocol error: {0}")]
    Protocol(String),

    /// The tracker exited unsuccessfully after reporting frames.
    #[error("Tracker exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("Tracker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Model inputs for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerParams {
    pub model_name: String,
    pub image_size: (u32, u32),
    pub min_confidence: f64,
    pub classes: Vec<u32>,
}

/// One detection in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    /// `None` when the tracker has not assigned an identity yet.
    pub track_id: Option<TrackId>,
    pub class_id: u32,
    pub confidence: f64,
    pub bbox: NormBox,
}

/// All detections in one frame, with the frame itself.
#[derive(Debug, Clone)]
pub struct TrackedFrame {
    /// 1-based.
    pub index: FrameIndex,
    pub image: RgbImage,
    pub boxes: Vec<TrackedBox>,
}

/// Frame-ordered tracking results for one clip.
#[async_trait]
pub trait TrackStream: Send {
    fn frame_rate(&self) -> f64;

    /// `Ok(None)` after the last frame.
    async fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError>;

    /// Release the stream. Reports a tracker that already failed.
    async fn close(&mut self) -> Result<(), TrackerError> {
        Ok(())
    }
}

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Start tracking `source`. Fails with [`TrackerError::StreamNotFound`]
    /// when the clip cannot be opened.
    async fn open(
        &self,
        source: &str,
        params: &TrackerParams,
    ) -> Result<Box<dyn TrackStream>, TrackerError>;
}

// ---------------------------------------------------------------------------
// JSON-lines protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FrameLine {
    frame: FrameIndex,
    #[serde(default)]
    boxes: Vec<BoxLine>,
}

#[derive(Debug, Deserialize)]
struct BoxLine {
    id: Option<TrackId>,
    cls: u32,
    conf: f64,
    xyxyn: [f64; 4],
}

/// Parse one tracker output line into a frame index and its boxes.
pub fn parse_frame_line(line: &str) -> Result<(FrameIndex, Vec<TrackedBox>), TrackerError> {
    let parsed: FrameLine = serde_json::from_str(line)
        .map_err(|e| TrackerError::Protocol(format!("{e}: {line}")))?;
    let boxes = parsed
        .boxes
        .into_iter()
        .map(|b| TrackedBox {
            track_id: b.id,
            class_id: b.cls,
            confidence: b.conf,
            bbox: NormBox::new(b.xyxyn[0], b.xyxyn[1], b.xyxyn[2], b.xyxyn[3]),
        })
        .collect();
    Ok((parsed.frame, boxes))
}

// ---------------------------------------------------------------------------
// SubprocessTracker
// ---------------------------------------------------------------------------

/// Runs an external tracker program per clip.
///
/// The program is invoked as
/// `<program> [args..] --source <url> --model <name> --imgsz <W>x<H> --conf <c> --classes <c,..>`.
/// Frames are decoded separately through a [`SourceOpener`], ffmpeg by
/// default.
#[derive(Clone)]
pub struct SubprocessTracker {
    program: String,
    args: Vec<String>,
    frames: Arc<dyn SourceOpener>,
}

impl SubprocessTracker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            frames: Arc::new(FfmpegOpener),
        }
    }

    /// Split a whitespace-separated command line (`TRACKER_COMMAND`).
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Decode frames with `opener` instead of ffmpeg.
    pub fn with_frames(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.frames = opener;
        self
    }

    fn command(&self, source: &str, params: &TrackerParams) -> Command {
        let classes = params
            .classes
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(["--source", source])
            .args(["--model", &params.model_name])
            .args([
                "--imgsz",
                &format!("{}x{}", params.image_size.0, params.image_size.1),
            ])
            .args(["--conf", &params.min_confidence.to_string()])
            .args(["--classes", &classes])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl std::fmt::Debug for SubprocessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTracker")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tracker for SubprocessTracker {
    async fn open(
        &self,
        source: &str,
        params: &TrackerParams,
    ) -> Result<Box<dyn TrackStream>, TrackerError> {
        let frames = self.frames.open(source).await.map_err(|e| match e {
            FrameError::Spawn(io) => TrackerError::Io(io),
            other => TrackerError::StreamNotFound(other.to_string()),
        })?;

        let mut child = self.command(source, params).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrackerError::Protocol("tracker stdout unavailable".into()))?;
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(stderr_tail(pipe)));

        Ok(Box::new(SubprocessTrackStream {
            frames,
            child: Some(child),
            lines: BufReader::new(stdout).lines(),
            stderr,
            frame_index: 0,
            reported: 0,
        }))
    }
}

/// Collect the last [`STDERR_TAIL_LINES`] lines of a pipe.
async fn stderr_tail(pipe: impl AsyncRead + Unpin) -> String {
    let mut lines = BufReader::new(pipe).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

struct SubprocessTrackStream {
    frames: Box<dyn FrameSource>,
    child: Option<Child>,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    frame_index: FrameIndex,
    /// Frame lines received from the tracker.
    reported: u64,
}

impl SubprocessTrackStream {
    async fn stderr_text(&mut self) -> String {
        match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Map a finished tracker's exit status. A tracker that fails before
    /// its first frame could not open the clip.
    async fn check_exit(&mut self, status: ExitStatus) -> Result<(), TrackerError> {
        if status.success() {
            return Ok(());
        }
        let stderr = self.stderr_text().await;
        if self.reported == 0 {
            return Err(TrackerError::StreamNotFound(format!(
                "tracker exited with {status} before the first frame: {stderr}"
            )));
        }
        Err(TrackerError::Exited {
            status: status.to_string(),
            stderr,
        })
    }
}

#[async_trait]
impl TrackStream for SubprocessTrackStream {
    fn frame_rate(&self) -> f64 {
        self.frames.frame_rate()
    }

    async fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError> {
        let Some(line) = self.lines.next_line().await? else {
            let Some(mut child) = self.child.take() else {
                return Ok(None);
            };
            let status = child.wait().await?;
            self.check_exit(status).await?;
            return Ok(None);
        };
        let (index, boxes) = parse_frame_line(&line)?;
        self.reported += 1;

        // Decode up to the frame the tracker reported on.
        let mut image = None;
        while self.frame_index < index {
            image = self
                .frames
                .read_frame()
                .await
                .map_err(|e| TrackerError::Protocol(e.to_string()))?;
            if image.is_none() {
                return Err(TrackerError::Protocol(format!(
                    "tracker reported frame {index} but the clip ended at {}",
                    self.frame_index
                )));
            }
            self.frame_index += 1;
        }
        let image = image.ok_or_else(|| {
            TrackerError::Protocol(format!("tracker frame {index} is out of order"))
        })?;

        Ok(Some(TrackedFrame {
            index,
            image,
            boxes,
        }))
    }

    async fn close(&mut self) -> Result<(), TrackerError> {
        self.frames.close().await;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait()? {
            Some(status) => self.check_exit(status).await,
            None => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "Tracker already exited");
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_frame_line() {
        let (index, boxes) = parse_frame_line(
            r#"{"frame":4,"boxes":[{"id":3,"cls":0,"conf":0.87,"xyxyn":[0.4,0.2,0.5,0.6]},
                {"id":null,"cls":2,"conf":0.5,"xyxyn":[0,0,0.1,0.1]}]}"#,
        )
        .unwrap();
        assert_eq!(index, 4);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].track_id, Some(3));
        assert_eq!(boxes[0].bbox, NormBox::new(0.4, 0.2, 0.5, 0.6));
        assert_eq!(boxes[1].track_id, None);
        assert_eq!(boxes[1].class_id, 2);
    }

    #[test]
    fn frame_without_boxes() {
        let (index, boxes) = parse_frame_line(r#"{"frame":1}"#).unwrap();
        assert_eq!(index, 1);
        assert!(boxes.is_empty());
    }

    #[test]
    fn malformed_line_is_protocol_error() {
        assert_matches!(parse_frame_line("not json"), Err(TrackerError::Protocol(_)));
        assert_matches!(
            parse_frame_line(r#"{"frame":1,"boxes":[{"cls":0,"conf":1,"xyxyn":[0,0]}]}"#),
            Err(TrackerError::Protocol(_))
        );
    }

    #[test]
    fn command_line_split() {
        let tracker = SubprocessTracker::from_command_line("python3 track.py --device cpu").unwrap();
        assert_eq!(tracker.program, "python3");
        assert_eq!(tracker.args, vec!["track.py", "--device", "cpu"]);
        assert!(SubprocessTracker::from_command_line("   ").is_none());
    }
}
