//! Keyed configuration names, built-in defaults, and the settings value
//! objects handed to the capture and detection components.

use std::time::Duration;

use crate::classifier::BoxLimits;
use crate::clip::DEFAULT_CONTAINER;
use crate::error::CoreError;
use crate::geometry::TriggerLine;
use crate::movement::DEFAULT_MOVEMENT_FRACTION;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub const VIDEO_URL: &str = "VIDEO_URL";
pub const VIDEO_CLIP_DURATION: &str = "VIDEO_CLIP_DURATION";
pub const VIDEO_OUTPUT_FPS: &str = "VIDEO_OUTPUT_FPS";
pub const CAPTURE_VIDEO_SERVICE_START: &str = "CAPTURE_VIDEO_SERVICE_START";
pub const CAPTURE_VIDEO_SERVICE_RUNNING: &str = "CAPTURE_VIDEO_SERVICE_RUNNING";
pub const DETECT_VIDEO_SERVICE_START: &str = "DETECT_VIDEO_SERVICE_START";
pub const DETECT_VIDEO_SERVICE_RUNNING: &str = "DETECT_VIDEO_SERVICE_RUNNING";
pub const TRIGGER_LINE_XYXYN: &str = "TRIGGER_LINE_XYXYN";
pub const DETECTION_CONFIDENCE_THRESHOLD: &str = "DETECTION_CONFIDENCE_THRESHOLD";
pub const YOLO_MODEL_NAME: &str = "YOLO_MODEL_NAME";
pub const DETECT_ANALYTICS_IMAGE_SIZE: &str = "DETECT_ANALYTICS_IMAGE_SIZE";
pub const CAMERA_LOCATION: &str = "CAMERA_LOCATION";
pub const MOVEMENT_FILTER_FRACTION: &str = "MOVEMENT_FILTER_FRACTION";
pub const LATEST_DETECTED_PHOTO_URL: &str = "LATEST_DETECTED_PHOTO_URL";

/// Built-in value for a key the configuration service does not know.
pub fn default_value(key: &str) -> Option<&'static str> {
    let value = match key {
        VIDEO_CLIP_DURATION => "30",
        VIDEO_OUTPUT_FPS => "25",
        CAPTURE_VIDEO_SERVICE_START
        | CAPTURE_VIDEO_SERVICE_RUNNING
        | DETECT_VIDEO_SERVICE_START
        | DETECT_VIDEO_SERVICE_RUNNING => "False",
        TRIGGER_LINE_XYXYN => "0.0:0.5:1.0:0.5",
        DETECTION_CONFIDENCE_THRESHOLD => "0.6",
        YOLO_MODEL_NAME => "yolov8n.pt",
        DETECT_ANALYTICS_IMAGE_SIZE => "1280x720",
        CAMERA_LOCATION => "Finish",
        MOVEMENT_FILTER_FRACTION => "0.1",
        LATEST_DETECTED_PHOTO_URL => "",
        _ => return None,
    };
    Some(value)
}

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

/// `True`, `true` and `1` are truthy; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "True" | "true" | "1")
}

/// Render a flag the way the configuration service stores it.
pub fn render_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Parse `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_image_size(value: &str) -> Result<(u32, u32), CoreError> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| CoreError::Validation(format!("image size '{value}' is not WIDTHxHEIGHT")))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|e| CoreError::Validation(format!("image width '{w}': {e}")))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|e| CoreError::Validation(format!("image height '{h}': {e}")))?;
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(format!(
            "image size '{value}' must be non-zero"
        )));
    }
    Ok((width, height))
}

pub fn parse_f64(key: &str, value: &str) -> Result<f64, CoreError> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|e| CoreError::Validation(format!("{key}='{value}': {e}")))?;
    if !parsed.is_finite() {
        return Err(CoreError::Validation(format!("{key}='{value}' is not finite")));
    }
    Ok(parsed)
}

pub fn parse_u64(key: &str, value: &str) -> Result<u64, CoreError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| CoreError::Validation(format!("{key}='{value}': {e}")))
}

// ---------------------------------------------------------------------------
// Value objects
// ---------------------------------------------------------------------------

/// Default consecutive read failures that end a segment.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Default number of failure bursts after which capture stops.
pub const DEFAULT_MAX_ERRORS: u32 = 10;

/// Rate assumed when neither the source nor the settings give a usable one.
pub const FALLBACK_FPS: f64 = 25.0;

/// Inputs to one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub video_url: String,
    pub clip_duration: Duration,
    /// Target output rate; frames are decimated when the source is faster.
    pub output_fps: f64,
    pub max_consecutive_errors: u32,
    pub max_errors: u32,
    pub container: String,
}

impl CaptureSettings {
    pub fn new(video_url: impl Into<String>, clip_duration: Duration, output_fps: f64) -> Self {
        Self {
            video_url: video_url.into(),
            clip_duration,
            output_fps,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            max_errors: DEFAULT_MAX_ERRORS,
            container: DEFAULT_CONTAINER.to_string(),
        }
    }

    /// The source rate to capture with. Sources that report no usable rate
    /// (ffprobe's `0/0`) are taken to run at the target output rate, or at
    /// [`FALLBACK_FPS`] when that is unusable too.
    pub fn source_fps(&self, probed_fps: f64) -> f64 {
        [probed_fps, self.output_fps]
            .into_iter()
            .find(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FPS)
    }

    /// Keep every Nth source frame: `round(source / target)`, at least 1.
    pub fn decimation_stride(&self, source_fps: f64) -> u64 {
        if self.output_fps <= 0.0 || source_fps <= 0.0 {
            return 1;
        }
        ((source_fps / self.output_fps).round() as u64).max(1)
    }

    /// Source frames read per clip (before decimation).
    pub fn frames_per_clip(&self, source_fps: f64) -> u64 {
        ((source_fps * self.clip_duration.as_secs_f64()).round() as u64).max(1)
    }

    /// Rate the written clip is encoded at. Always positive.
    pub fn effective_fps(&self, source_fps: f64) -> f64 {
        let source_fps = self.source_fps(source_fps);
        source_fps / self.decimation_stride(source_fps) as f64
    }
}

/// Inputs to scoring one clip, re-read between work items.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub trigger_line: TriggerLine,
    pub min_confidence: f64,
    pub model_name: String,
    pub image_size: (u32, u32),
    pub camera_location: String,
    pub movement_fraction: f64,
    pub box_limits: BoxLimits,
}

impl DetectionSettings {
    pub fn new(trigger_line: TriggerLine) -> Self {
        Self {
            trigger_line,
            min_confidence: 0.6,
            model_name: "yolov8n.pt".to_string(),
            image_size: (1280, 720),
            camera_location: "Finish".to_string(),
            movement_fraction: DEFAULT_MOVEMENT_FRACTION,
            box_limits: BoxLimits::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
