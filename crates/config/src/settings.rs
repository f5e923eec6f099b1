//! Typed loaders for the capture and detection settings.

use std::time::Duration;

use crossline_core::geometry::TriggerLine;
use crossline_core::settings::{
    parse_image_size, CaptureSettings, DetectionSettings, CAMERA_LOCATION,
    DETECTION_CONFIDENCE_THRESHOLD, DETECT_ANALYTICS_IMAGE_SIZE, MOVEMENT_FILTER_FRACTION,
    TRIGGER_LINE_XYXYN, VIDEO_CLIP_DURATION, VIDEO_OUTPUT_FPS, VIDEO_URL, YOLO_MODEL_NAME,
};

use crate::error::ConfigError;
use crate::source::ConfigSource;

pub async fn load_capture_settings(
    source: &dyn ConfigSource,
) -> Result<CaptureSettings, ConfigError> {
    let video_url = source.get(VIDEO_URL).await?;
    let clip_duration = Duration::from_secs(source.get_u64(VIDEO_CLIP_DURATION).await?.max(1));
    let output_fps = source.get_f64(VIDEO_OUTPUT_FPS).await?;
    Ok(CaptureSettings::new(video_url, clip_duration, output_fps))
}

/// Read fresh detection settings. Called once per clip so that operator
/// changes (e.g. a moved trigger line) apply from the next clip on.
pub async fn load_detection_settings(
    source: &dyn ConfigSource,
) -> Result<DetectionSettings, ConfigError> {
    let trigger_line = TriggerLine::parse(&source.get(TRIGGER_LINE_XYXYN).await?)?;
    let mut settings = DetectionSettings::new(trigger_line);
    settings.min_confidence = source.get_f64(DETECTION_CONFIDENCE_THRESHOLD).await?;
    settings.model_name = source.get(YOLO_MODEL_NAME).await?;
    settings.image_size = parse_image_size(&source.get(DETECT_ANALYTICS_IMAGE_SIZE).await?)?;
    settings.camera_location = source.get(CAMERA_LOCATION).await?;
    settings.movement_fraction = source.get_f64(MOVEMENT_FILTER_FRACTION).await?;
    Ok(settings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfigSource;
    use assert_matches::assert_matches;
    use crossline_core::error::CoreError;

    #[tokio::test]
    async fn detection_settings_from_defaults() {
        let source = MemoryConfigSource::new();
        let settings = load_detection_settings(&source).await.unwrap();
        assert_eq!(settings.trigger_line, TriggerLine::new(0.0, 0.5, 1.0, 0.5).unwrap());
        assert_eq!(settings.min_confidence, 0.6);
        assert_eq!(settings.image_size, (1280, 720));
        assert_eq!(settings.movement_fraction, 0.1);
    }

    #[tokio::test]
    async fn detection_settings_overrides() {
        let source = MemoryConfigSource::with_values([
            (TRIGGER_LINE_XYXYN, "0.1:0.4:0.9:0.6"),
            (CAMERA_LOCATION, "Start"),
            (DETECT_ANALYTICS_IMAGE_SIZE, "640x480"),
        ]);
        let settings = load_detection_settings(&source).await.unwrap();
        assert_eq!(settings.trigger_line.y2, 0.6);
        assert_eq!(settings.camera_location, "Start");
        assert_eq!(settings.image_size, (640, 480));
    }

    #[tokio::test]
    async fn bad_trigger_line_is_invalid() {
        let source = MemoryConfigSource::with_values([(TRIGGER_LINE_XYXYN, "0.9:0.5:0.1:0.5")]);
        assert_matches!(
            load_detection_settings(&source).await,
            Err(ConfigError::Invalid(CoreError::Validation(_)))
        );
    }

    #[tokio::test]
    async fn capture_settings_require_video_url() {
        let source = MemoryConfigSource::new();
        assert_matches!(load_capture_settings(&source).await, Err(ConfigError::NotFound(_)));

        let source = MemoryConfigSource::with_values([(VIDEO_URL, "rtsp://cam/1")]);
        let settings = load_capture_settings(&source).await.unwrap();
        assert_eq!(settings.clip_duration, Duration::from_secs(30));
        assert_eq!(settings.output_fps, 25.0);
    }
}
