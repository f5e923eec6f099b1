use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use crossline_cloud::backlog::Backlog;
use crossline_cloud::layout::KeyLayout;
use crossline_cloud::local::LocalBacklog;
use crossline_config::memory::MemoryConfigSource;
use crossline_config::{ConfigError, ConfigSource};
use crossline_core::settings::{CaptureSettings, CAPTURE_VIDEO_SERVICE_START};
use crossline_pipeline::capture::{CaptureError, CaptureLoop, StopReason};
use crossline_pipeline::clip_writer::{ClipEncoder, ClipWriteError, ClipWriter, EncoderSession};
use crossline_pipeline::frame::{FrameError, FrameSource, SourceOpener};
use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Step {
    /// A frame whose pixels carry the given marker value.
    Frame(u8),
    Empty,
    Fail,
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    fps: f64,
    /// After the script: block forever instead of reporting end of stream.
    hang_at_end: bool,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        (2, 2)
    }

    async fn read_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        match self.steps.pop_front() {
            Some(Step::Frame(marker)) => Ok(Some(RgbImage::from_pixel(2, 2, Rgb([marker, 0, 0])))),
            Some(Step::Empty) => Ok(None),
            Some(Step::Fail) => Err(FrameError::Read("packet lost".into())),
            None if self.hang_at_end => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedOpener {
    source: Mutex<Option<ScriptedSource>>,
}

impl ScriptedOpener {
    fn new(steps: Vec<Step>, hang_at_end: bool) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            steps: steps.into(),
            fps: 10.0,
            hang_at_end,
            closed: closed.clone(),
        };
        (
            Self {
                source: Mutex::new(Some(source)),
            },
            closed,
        )
    }

    /// A source that reports `fps` as its frame rate.
    fn with_fps(steps: Vec<Step>, fps: f64) -> Self {
        let (opener, _) = Self::new(steps, false);
        if let Some(source) = opener.source.lock().unwrap().as_mut() {
            source.fps = fps;
        }
        opener
    }

    fn unavailable() -> Self {
        Self {
            source: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SourceOpener for ScriptedOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, FrameError> {
        match self.source.lock().unwrap().take() {
            Some(source) => Ok(Box::new(source)),
            None => Err(FrameError::Open {
                url: url.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording encoder
// ---------------------------------------------------------------------------

/// Records the marker of every frame written, per clip.
#[derive(Default)]
struct RecordingEncoder {
    fail_open: bool,
    clips: Arc<Mutex<Vec<Vec<u8>>>>,
    rates: Arc<Mutex<Vec<f64>>>,
}

struct RecordingSession {
    path: std::path::PathBuf,
    markers: Vec<u8>,
    clips: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl ClipEncoder for RecordingEncoder {
    async fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        _frame_size: (u32, u32),
    ) -> Result<Box<dyn EncoderSession>, ClipWriteError> {
        self.rates.lock().unwrap().push(frame_rate);
        if self.fail_open {
            return Err(ClipWriteError::EncoderOpen("no encoder".into()));
        }
        Ok(Box::new(RecordingSession {
            path: path.to_path_buf(),
            markers: Vec::new(),
            clips: self.clips.clone(),
        }))
    }
}

#[async_trait]
impl EncoderSession for RecordingSession {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), ClipWriteError> {
        self.markers.push(frame.get_pixel(0, 0)[0]);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), ClipWriteError> {
        tokio::fs::write(&self.path, &self.markers)
            .await
            .map_err(|e| ClipWriteError::Encode(e.to_string()))?;
        self.clips.lock().unwrap().push(self.markers);
        Ok(())
    }
}

/// Config whose reads always fail.
struct UnreachableConfig;

#[async_trait]
impl ConfigSource for UnreachableConfig {
    async fn get(&self, _key: &str) -> Result<String, ConfigError> {
        Err(ConfigError::Api {
            status: 503,
            body: "unavailable".into(),
        })
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), ConfigError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    backlog: Arc<LocalBacklog>,
    clips: Arc<Mutex<Vec<Vec<u8>>>>,
    rates: Arc<Mutex<Vec<f64>>>,
    writer: Arc<ClipWriter>,
}

fn harness(fail_open: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backlog = Arc::new(LocalBacklog::new(dir.path(), KeyLayout::new("ev1")));
    let encoder = RecordingEncoder {
        fail_open,
        ..Default::default()
    };
    let clips = encoder.clips.clone();
    let rates = encoder.rates.clone();
    let writer = Arc::new(ClipWriter::new(
        Arc::new(encoder),
        dir.path().join("ev1").join("CAPTURE"),
        backlog.clone(),
    ));
    Harness {
        _dir: dir,
        backlog,
        clips,
        rates,
        writer,
    }
}

/// 1 second clips at 5 fps from a 10 fps source: stride 2, 10 reads per
/// clip, at most 3 failed reads in a row, 2 bursts allowed.
fn settings() -> CaptureSettings {
    let mut settings = CaptureSettings::new("rtsp://camera/stream", Duration::from_secs(1), 5.0);
    settings.max_consecutive_errors = 3;
    settings.max_errors = 2;
    settings
}

fn frames(range: std::ops::Range<u8>) -> Vec<Step> {
    range.map(Step::Frame).collect()
}

fn start_flag(running: bool) -> Arc<MemoryConfigSource> {
    let value = if running { "True" } else { "False" };
    Arc::new(MemoryConfigSource::with_values([(CAPTURE_VIDEO_SERVICE_START, value)]))
}

fn sorted(mut clips: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    clips.sort();
    clips
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn decimates_and_stops_when_flag_cleared() {
    let h = harness(false);
    let (opener, closed) = ScriptedOpener::new(frames(0..30), false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(false));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert_eq!(report.clips_started, 1);
    assert_eq!(report.clips_written.len(), 1);
    assert_eq!(report.output_fps, 5.0);
    assert_eq!(*h.clips.lock().unwrap(), vec![vec![0, 2, 4, 6, 8]]);
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(h.backlog.list_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn source_without_frame_rate_is_captured_at_output_rate() {
    let h = harness(false);
    let opener = ScriptedOpener::with_fps(frames(0..30), 0.0);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(false));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.source_fps, 5.0);
    assert_eq!(report.output_fps, 5.0);
    assert!(report.write_errors.is_empty());
    assert_eq!(*h.clips.lock().unwrap(), vec![vec![0, 1, 2, 3, 4]]);
    assert_eq!(*h.rates.lock().unwrap(), vec![5.0]);
}

#[tokio::test]
async fn segments_continue_until_error_budget_is_spent() {
    let h = harness(false);
    let (opener, closed) = ScriptedOpener::new(frames(0..20), false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(true));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    // Two full segments, then end of stream produces two empty bursts.
    assert_eq!(report.stop_reason, StopReason::ErrorBudgetExhausted);
    assert_eq!(report.error_bursts, 2);
    assert_eq!(report.clips_started, 2);
    assert_eq!(report.clips_written.len(), 2);
    assert!(report.write_errors.is_empty());
    assert_eq!(
        sorted(h.clips.lock().unwrap().clone()),
        vec![vec![0, 2, 4, 6, 8], vec![10, 12, 14, 16, 18]]
    );
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn successful_read_resets_consecutive_errors() {
    let h = harness(false);
    let mut steps = vec![Step::Fail, Step::Empty];
    steps.extend(frames(0..5));
    steps.extend([Step::Fail, Step::Fail]);
    steps.extend(frames(5..10));
    let (opener, _) = ScriptedOpener::new(steps, false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(false));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.error_bursts, 0);
    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert_eq!(*h.clips.lock().unwrap(), vec![vec![0, 2, 4, 6, 8]]);
}

#[tokio::test]
async fn error_burst_flushes_partial_segment() {
    let h = harness(false);
    let mut steps = frames(0..4);
    steps.extend([Step::Fail, Step::Fail, Step::Fail]);
    let (opener, _) = ScriptedOpener::new(steps, false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(false));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.error_bursts, 1);
    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert_eq!(*h.clips.lock().unwrap(), vec![vec![0, 2]]);
}

#[tokio::test]
async fn cancellation_stops_a_blocked_read() {
    let h = harness(false);
    let (opener, closed) = ScriptedOpener::new(frames(0..3), true);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(true));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let report = tokio::time::timeout(Duration::from_secs(5), capture.run(&settings(), cancel))
        .await
        .expect("capture should stop on cancellation")
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(*h.clips.lock().unwrap(), vec![vec![0, 2]]);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unreadable_start_flag_stops_capture() {
    let h = harness(false);
    let (opener, _) = ScriptedOpener::new(frames(0..30), false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), Arc::new(UnreachableConfig));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_matches!(report.stop_reason, StopReason::ConfigUnavailable(_));
    assert_eq!(report.clips_written.len(), 1);
}

#[tokio::test]
async fn write_failures_are_reported_after_capture() {
    let h = harness(true);
    let (opener, _) = ScriptedOpener::new(frames(0..10), false);
    let capture = CaptureLoop::new(Arc::new(opener), h.writer.clone(), start_flag(false));

    let report = capture.run(&settings(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.clips_started, 1);
    assert!(report.clips_written.is_empty());
    assert_matches!(report.write_errors.as_slice(), [ClipWriteError::EncoderOpen(_)]);
    assert!(h.backlog.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_source_is_an_error() {
    let h = harness(false);
    let capture = CaptureLoop::new(
        Arc::new(ScriptedOpener::unavailable()),
        h.writer.clone(),
        start_flag(true),
    );

    let result = capture.run(&settings(), CancellationToken::new()).await;

    assert_matches!(result, Err(CaptureError::SourceOpen(FrameError::Open { .. })));
    assert!(h.clips.lock().unwrap().is_empty());
}
