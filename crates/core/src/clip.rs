//! Clip identity and naming.
//!
//! Clip files are named `CAPTURED_<YYYYMMDD_HHMMSS>_<sequence>.<container>`
//! with the UTC time the segment started. Writers first produce
//! `TMP_CAPTURED_...` and rename on success, so a name with the temp
//! prefix is never a finished clip.

use std::sync::LazyLock;

use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::CoreError;
use crate::types::{FrameIndex, Timestamp};

/// Prefix of every finished clip file.
pub const CLIP_PREFIX: &str = "CAPTURED_";

/// Prefix of an in-progress clip file.
pub const TEMP_PREFIX: &str = "TMP_";

/// Container extension used for captured clips.
pub const DEFAULT_CONTAINER: &str = "mp4";

/// Suffix appended to a clip's storage path to form its lock path.
pub const LOCK_SUFFIX: &str = ".lock";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static CLIP_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CAPTURED_(\d{8}_\d{6})_(\d+)\.([A-Za-z0-9]+)$").expect("valid regex")
});

// ---------------------------------------------------------------------------
// ClipName
// ---------------------------------------------------------------------------

/// Parsed clip file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipName {
    started_at: Timestamp,
    sequence: u64,
    container: String,
}

impl ClipName {
    /// Name for segment `sequence` of a capture session that started the
    /// segment at `started_at`. Sub-second precision is dropped.
    pub fn new(started_at: Timestamp, sequence: u64, container: impl Into<String>) -> Self {
        let started_at = Utc
            .timestamp_opt(started_at.timestamp(), 0)
            .single()
            .unwrap_or(started_at);
        Self {
            started_at,
            sequence,
            container: container.into(),
        }
    }

    /// Parse a finished clip file name (no directory component).
    pub fn parse(file_name: &str) -> Result<Self, CoreError> {
        let caps = CLIP_NAME_RE
            .captures(file_name)
            .ok_or_else(|| CoreError::InvalidClipName(file_name.to_string()))?;

        let naive = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT)
            .map_err(|e| CoreError::InvalidClipName(format!("{file_name}: {e}")))?;
        let sequence = caps[2]
            .parse::<u64>()
            .map_err(|e| CoreError::InvalidClipName(format!("{file_name}: {e}")))?;

        Ok(Self {
            started_at: Utc.from_utc_datetime(&naive),
            sequence,
            container: caps[3].to_string(),
        })
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Final file name, e.g. `CAPTURED_20241217_101500_3.mp4`.
    pub fn file_name(&self) -> String {
        format!(
            "{CLIP_PREFIX}{}_{}.{}",
            self.started_at.format(TIMESTAMP_FORMAT),
            self.sequence,
            self.container
        )
    }

    /// Temporary file name the writer encodes into before the rename.
    pub fn temp_file_name(&self) -> String {
        format!("{TEMP_PREFIX}{}", self.file_name())
    }

    /// Wall-clock time of a 1-based frame within this clip.
    pub fn frame_time(&self, frame_index: FrameIndex, frame_rate: f64) -> Timestamp {
        frame_time(self.started_at, frame_index, frame_rate)
    }
}

/// `start + (frame_index - 1) / frame_rate`. A non-positive rate yields `start`.
pub fn frame_time(start: Timestamp, frame_index: FrameIndex, frame_rate: f64) -> Timestamp {
    if frame_rate <= 0.0 || !frame_rate.is_finite() {
        return start;
    }
    let offset_secs = frame_index.saturating_sub(1) as f64 / frame_rate;
    start + chrono::Duration::microseconds((offset_secs * 1_000_000.0).round() as i64)
}

/// Whether a file name is an unfinished writer output.
pub fn is_temp_name(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX)
}

/// Whether a file name is a lock object.
pub fn is_lock_name(file_name: &str) -> bool {
    file_name.ends_with(LOCK_SUFFIX)
}

/// Lock path guarding the clip stored at `clip_path`.
pub fn lock_path(clip_path: &str) -> String {
    format!("{clip_path}{LOCK_SUFFIX}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
