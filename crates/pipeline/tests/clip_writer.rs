use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use crossline_cloud::backlog::Backlog;
use crossline_cloud::layout::KeyLayout;
use crossline_cloud::local::LocalBacklog;
use crossline_core::clip::ClipName;
use crossline_pipeline::clip_writer::{
    temp_path_for, write_clip, ClipBatch, ClipEncoder, ClipWriteError, ClipWriter, EncoderSession,
};
use image::RgbImage;
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// Fake encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Failure {
    None,
    /// Creates the output file, then reports failure.
    Open,
    Write,
    Finish,
}

struct FakeEncoder {
    failure: Failure,
    opened: Mutex<Vec<PathBuf>>,
}

impl FakeEncoder {
    fn new(failure: Failure) -> Self {
        Self {
            failure,
            opened: Mutex::new(Vec::new()),
        }
    }
}

struct FakeSession {
    file: tokio::fs::File,
    failure: Failure,
}

#[async_trait]
impl ClipEncoder for FakeEncoder {
    async fn open(
        &self,
        path: &Path,
        _frame_rate: f64,
        _frame_size: (u32, u32),
    ) -> Result<Box<dyn EncoderSession>, ClipWriteError> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ClipWriteError::EncoderOpen(e.to_string()))?;
        if self.failure == Failure::Open {
            return Err(ClipWriteError::EncoderOpen("codec unavailable".into()));
        }
        Ok(Box::new(FakeSession {
            file,
            failure: self.failure,
        }))
    }
}

#[async_trait]
impl EncoderSession for FakeSession {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), ClipWriteError> {
        if self.failure == Failure::Write {
            return Err(ClipWriteError::Encode("broken pipe".into()));
        }
        self.file
            .write_all(frame.as_raw())
            .await
            .map_err(|e| ClipWriteError::Encode(e.to_string()))
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ClipWriteError> {
        if self.failure == Failure::Finish {
            return Err(ClipWriteError::Encode("muxer error".into()));
        }
        self.file
            .flush()
            .await
            .map_err(|e| ClipWriteError::Encode(e.to_string()))
    }
}

fn frames(count: usize) -> Vec<RgbImage> {
    (0..count).map(|_| RgbImage::new(4, 2)).collect()
}

fn clip_name() -> ClipName {
    let started = Utc.with_ymd_and_hms(2024, 12, 17, 10, 15, 0).unwrap();
    ClipName::new(started, 1, "mp4")
}

// ---------------------------------------------------------------------------
// write_clip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_write_leaves_only_final_file() {
    let dir = tempfile::tempdir().unwrap();
    let final_path = dir.path().join("CAPTURED_20241217_101500_1.mp4");
    let encoder = FakeEncoder::new(Failure::None);

    write_clip(&encoder, &frames(3), 5.0, (4, 2), &final_path).await.unwrap();

    assert!(final_path.exists());
    assert!(!temp_path_for(&final_path).exists());
    assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 3 * 4 * 2 * 3);
    assert_eq!(encoder.opened.lock().unwrap()[0], temp_path_for(&final_path));
}

#[tokio::test]
async fn encoder_open_failure_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let final_path = dir.path().join("CAPTURED_20241217_101500_1.mp4");
    let encoder = FakeEncoder::new(Failure::Open);

    let result = write_clip(&encoder, &frames(3), 5.0, (4, 2), &final_path).await;

    assert_matches!(result, Err(ClipWriteError::EncoderOpen(_)));
    assert!(!final_path.exists());
    assert!(!temp_path_for(&final_path).exists());
}

#[tokio::test]
async fn encode_failures_remove_temp_file() {
    for failure in [Failure::Write, Failure::Finish] {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("CAPTURED_20241217_101500_1.mp4");
        let encoder = FakeEncoder::new(failure);

        let result = write_clip(&encoder, &frames(2), 5.0, (4, 2), &final_path).await;

        assert_matches!(result, Err(ClipWriteError::Encode(_)), "{failure:?}");
        assert!(!final_path.exists(), "{failure:?}");
        assert!(!temp_path_for(&final_path).exists(), "{failure:?}");
    }
}

#[tokio::test]
async fn rename_failure_keeps_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let final_path = dir.path().join("CAPTURED_20241217_101500_1.mp4");
    // A non-empty directory in the way makes the rename fail.
    std::fs::create_dir(&final_path).unwrap();
    std::fs::write(final_path.join("occupant"), b"x").unwrap();
    let encoder = FakeEncoder::new(Failure::None);

    let result = write_clip(&encoder, &frames(1), 5.0, (4, 2), &final_path).await;

    assert_matches!(result, Err(ClipWriteError::Rename { temp, .. }) => {
        assert_eq!(temp, temp_path_for(&final_path));
    });
    assert!(temp_path_for(&final_path).is_file());
}

// ---------------------------------------------------------------------------
// ClipWriter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn writer_staging_in_backlog_publishes_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalBacklog::new(dir.path(), KeyLayout::new("ev1")));
    let backlog: Arc<dyn Backlog> = local.clone();
    let staging = dir.path().join("ev1").join("CAPTURE");
    let writer = Arc::new(ClipWriter::new(
        Arc::new(FakeEncoder::new(Failure::None)),
        &staging,
        backlog.clone(),
    ));

    let key = writer
        .spawn(ClipBatch {
            name: clip_name(),
            frames: frames(2),
            frame_rate: 5.0,
            frame_size: (4, 2),
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(key, "ev1/CAPTURE/CAPTURED_20241217_101500_1.mp4");
    assert!(local.path_for(&key).is_file());
    assert_eq!(
        backlog.list_pending().await.unwrap(),
        vec!["CAPTURED_20241217_101500_1.mp4".to_string()]
    );
}

#[tokio::test]
async fn writer_moves_clip_from_separate_staging_dir() {
    let backlog_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalBacklog::new(backlog_dir.path(), KeyLayout::new("ev1")));
    let writer = ClipWriter::new(
        Arc::new(FakeEncoder::new(Failure::None)),
        staging_dir.path(),
        local.clone(),
    );

    let key = writer
        .write(ClipBatch {
            name: clip_name(),
            frames: frames(1),
            frame_rate: 5.0,
            frame_size: (4, 2),
        })
        .await
        .unwrap();

    assert!(local.path_for(&key).is_file());
    assert!(!staging_dir.path().join("CAPTURED_20241217_101500_1.mp4").exists());
}

#[tokio::test]
async fn failed_write_is_never_pending() {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalBacklog::new(dir.path(), KeyLayout::new("ev1")));
    let writer = ClipWriter::new(
        Arc::new(FakeEncoder::new(Failure::Finish)),
        dir.path().join("ev1").join("CAPTURE"),
        local.clone(),
    );

    let result = writer
        .write(ClipBatch {
            name: clip_name(),
            frames: frames(2),
            frame_rate: 5.0,
            frame_size: (4, 2),
        })
        .await;

    assert_matches!(result, Err(ClipWriteError::Encode(_)));
    assert!(local.list_pending().await.unwrap().is_empty());
}
