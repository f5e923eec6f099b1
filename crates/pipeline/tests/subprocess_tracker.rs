#![cfg(unix)]

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use crossline_pipeline::frame::{FrameError, FrameSource, SourceOpener};
use crossline_pipeline::tracker::{SubprocessTracker, Tracker, TrackerError, TrackerParams};
use image::{Rgb, RgbImage};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Yields `remaining` solid 4x4 frames.
struct SolidFrames {
    remaining: usize,
}

#[async_trait]
impl FrameSource for SolidFrames {
    fn frame_rate(&self) -> f64 {
        10.0
    }

    fn frame_size(&self) -> (u32, u32) {
        (4, 4)
    }

    async fn read_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(RgbImage::from_pixel(4, 4, Rgb([20, 40, 60]))))
    }

    async fn close(&mut self) {}
}

/// Opens any URL except `missing.mp4`.
struct SolidOpener;

#[async_trait]
impl SourceOpener for SolidOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, FrameError> {
        if url.ends_with("missing.mp4") {
            return Err(FrameError::Open {
                url: url.to_string(),
                reason: "No such file".into(),
            });
        }
        Ok(Box::new(SolidFrames { remaining: 5 }))
    }
}

/// A tracker running `script` under `sh`. The tracker flags land in `$0..`.
fn shell_tracker(script: &str) -> SubprocessTracker {
    SubprocessTracker::new("sh", vec!["-c".into(), script.into(), "tracker".into()])
        .with_frames(Arc::new(SolidOpener))
}

/// The error from an `open` that must fail.
fn open_error<T>(result: Result<T, TrackerError>) -> TrackerError {
    match result {
        Ok(_) => panic!("open should fail"),
        Err(e) => e,
    }
}

fn params() -> TrackerParams {
    TrackerParams {
        model_name: "yolo11n.pt".into(),
        image_size: (640, 384),
        min_confidence: 0.25,
        classes: vec![0],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_exit_ends_the_stream() {
    let tracker = shell_tracker(
        r#"echo '{"frame":1,"boxes":[{"id":3,"cls":0,"conf":0.9,"xyxyn":[0.1,0.1,0.4,0.8]}]}'; echo '{"frame":3}'"#,
    );
    let mut stream = tracker.open("clip.mp4", &params()).await.unwrap();

    let first = stream.next_frame().await.unwrap().unwrap();
    assert_eq!(first.index, 1);
    assert_eq!(first.boxes[0].track_id, Some(3));
    let second = stream.next_frame().await.unwrap().unwrap();
    assert_eq!(second.index, 3);
    assert!(second.boxes.is_empty());
    assert!(stream.next_frame().await.unwrap().is_none());
    stream.close().await.unwrap();
}

#[tokio::test]
async fn tracker_failing_before_first_frame_is_stream_not_found() {
    let tracker = shell_tracker("echo 'model not found' >&2; exit 2");
    let mut stream = tracker.open("clip.mp4", &params()).await.unwrap();

    let result = stream.next_frame().await;

    assert_matches!(result, Err(TrackerError::StreamNotFound(reason)) if reason.contains("model not found"));
    stream.close().await.unwrap();
}

#[tokio::test]
async fn tracker_crash_mid_clip_is_an_error_not_end_of_clip() {
    let tracker = shell_tracker(
        r#"echo '{"frame":1}'; echo '{"frame":2}'; echo 'CUDA out of memory' >&2; exit 3"#,
    );
    let mut stream = tracker.open("clip.mp4", &params()).await.unwrap();

    assert!(stream.next_frame().await.unwrap().is_some());
    assert!(stream.next_frame().await.unwrap().is_some());
    let result = stream.next_frame().await;

    assert_matches!(
        result,
        Err(TrackerError::Exited { stderr, .. }) if stderr.contains("CUDA out of memory")
    );
}

#[tokio::test]
async fn unopenable_source_is_stream_not_found() {
    let tracker = shell_tracker("exit 0");
    let error = open_error(tracker.open("ev1/CAPTURE/missing.mp4", &params()).await);
    assert_matches!(error, TrackerError::StreamNotFound(_));
}

#[tokio::test]
async fn missing_tracker_program_is_io_error() {
    let tracker = SubprocessTracker::new("/nonexistent/crossline-tracker", Vec::new())
        .with_frames(Arc::new(SolidOpener));
    let error = open_error(tracker.open("clip.mp4", &params()).await);
    assert_matches!(error, TrackerError::Io(_));
}

#[tokio::test]
async fn frame_reported_past_end_of_clip_is_protocol_error() {
    let tracker = shell_tracker(r#"echo '{"frame":9}'"#);
    let mut stream = tracker.open("clip.mp4", &params()).await.unwrap();
    assert_matches!(stream.next_frame().await, Err(TrackerError::Protocol(_)));
    stream.close().await.unwrap();
}
