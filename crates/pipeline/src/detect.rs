//! Detection Worker Loop: drain the shared backlog one claimed clip at a
//! time.
//!
//! Per clip: claim it with the distributed lock, run the tracker, score the
//! frames, upload imagery for each crossing, publish [`CrossingEvent`]s and
//! move the clip to the archive. A clip the tracker cannot open is moved to
//! the error folder instead. A clip whose tracking fails part way is left
//! pending for a later drain; a partially scored clip is never archived.
//! The lock is released after every attempt, whatever the outcome.
//!
//! Processing is at-least-once: a worker that dies mid-clip leaves a lock
//! that expires, and the next worker reprocesses the clip from scratch.

use std::collections::HashSet;
use std::sync::Arc;

use crossline_cloud::backlog::{Artifact, Backlog};
use crossline_cloud::error::StorageError;
use crossline_cloud::layout::DETECT_FOLDER;
use crossline_cloud::lock::DistributedLock;
use crossline_config::settings::load_detection_settings;
use crossline_config::{ConfigError, ConfigSource};
use crossline_core::error::CoreError;
use crossline_core::settings::{DetectionSettings, LATEST_DETECTED_PHOTO_URL};
use crossline_core::types::PERSON_CLASS_ID;
use crossline_events::{CrossingEvent, EventBus};
use tokio_util::sync::CancellationToken;

use crate::imagery::{artifact_names, crossing_time_text, encode_jpeg, JPEG_CONTENT_TYPE};
use crate::session::{Crossing, DetectionSession};
use crate::tracker::{Tracker, TrackerError, TrackerParams};

/// Failures that stop a drain.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Backlog error: {0}")]
    Backlog(#[from] StorageError),

    #[error("Detection settings unavailable: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracker failed on {clip}: {source}")]
    Tracker { clip: String, source: TrackerError },

    #[error("Invalid clip {0}")]
    InvalidClip(#[from] CoreError),

    #[error("Encoding artifact for {clip} failed: {source}")]
    Image {
        clip: String,
        source: image::ImageError,
    },

    #[error("Uploading artifact for {clip} failed: {source}")]
    Upload { clip: String, source: StorageError },
}

/// What happened to one claimed clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipOutcome {
    Archived { crossings: usize },
    Quarantined,
    /// Another worker finished the clip between listing and claiming.
    Vanished,
}

/// Totals for one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub archived: u32,
    pub quarantined: u32,
    pub crossings: u32,
    /// Clips another worker held.
    pub contended: u32,
    /// Clips left pending after a tracker failure.
    pub failed: u32,
}

pub struct DetectionWorker {
    backlog: Arc<dyn Backlog>,
    lock: DistributedLock<dyn Backlog>,
    tracker: Arc<dyn Tracker>,
    config: Arc<dyn ConfigSource>,
    bus: Arc<EventBus>,
}

impl DetectionWorker {
    pub fn new(
        backlog: Arc<dyn Backlog>,
        lock: DistributedLock<dyn Backlog>,
        tracker: Arc<dyn Tracker>,
        config: Arc<dyn ConfigSource>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            backlog,
            lock,
            tracker,
            config,
            bus,
        }
    }

    /// Process clips until the backlog has none left that this worker can
    /// claim, or `cancel` fires.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport, DetectError> {
        let mut report = DrainReport::default();
        let mut skip: HashSet<String> = HashSet::new();
        let timeout = self.lock.config().timeout;

        while !cancel.is_cancelled() {
            let Some(clip) = self.backlog.next_unlocked(&skip, timeout).await? else {
                break;
            };
            let resource = self.backlog.layout().pending_key(&clip);

            if !self.lock.try_acquire(&resource).await {
                tracing::debug!(clip = %clip, "Clip claimed by another worker");
                report.contended += 1;
                skip.insert(clip);
                continue;
            }

            let result = self.process_claimed(&clip, &resource).await;
            self.lock.release(&resource).await;

            let outcome = match result {
                Err(DetectError::Tracker { source, .. }) => {
                    tracing::warn!(clip = %clip, error = %source, "Tracking failed, clip left pending");
                    report.failed += 1;
                    skip.insert(clip);
                    continue;
                }
                other => other?,
            };
            match outcome {
                ClipOutcome::Archived { crossings } => {
                    report.archived += 1;
                    report.crossings += crossings as u32;
                }
                ClipOutcome::Quarantined => report.quarantined += 1,
                ClipOutcome::Vanished => {
                    skip.insert(clip);
                }
            }
        }

        tracing::info!(
            archived = report.archived,
            quarantined = report.quarantined,
            crossings = report.crossings,
            contended = report.contended,
            failed = report.failed,
            "Detection drain finished"
        );
        Ok(report)
    }

    async fn process_claimed(&self, clip: &str, resource: &str) -> Result<ClipOutcome, DetectError> {
        if !self.backlog.exists(resource).await? {
            tracing::debug!(clip = %clip, "Clip no longer pending");
            return Ok(ClipOutcome::Vanished);
        }
        let settings = load_detection_settings(self.config.as_ref()).await?;
        self.process_clip(clip, &settings).await
    }

    /// Score one claimed clip and move it to its terminal folder.
    pub async fn process_clip(
        &self,
        clip: &str,
        settings: &DetectionSettings,
    ) -> Result<ClipOutcome, DetectError> {
        let source = self.backlog.source_url(clip).await?;
        let params = TrackerParams {
            model_name: settings.model_name.clone(),
            image_size: settings.image_size,
            min_confidence: settings.min_confidence,
            classes: vec![PERSON_CLASS_ID],
        };

        let mut stream = match self.tracker.open(&source, &params).await {
            Ok(stream) => stream,
            Err(e) => return self.tracking_failed(clip, e).await,
        };

        let mut session = match DetectionSession::new(clip, settings, stream.frame_rate()) {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_error) = stream.close().await {
                    tracing::debug!(clip = %clip, error = %close_error, "Tracker close failed");
                }
                return Err(e.into());
            }
        };
        let mut read_error = None;
        loop {
            match stream.next_frame().await {
                Ok(Some(frame)) => session.observe(&frame),
                Ok(None) => break,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }
        let closed = stream.close().await;
        if let Some(e) = read_error.or(closed.err()) {
            return self.tracking_failed(clip, e).await;
        }

        let outcome = session.finish();
        tracing::debug!(
            clip = %clip,
            frames = outcome.frames_scored,
            stationary = outcome.stationary_tracks.len(),
            "Clip scored"
        );

        let mut events = Vec::with_capacity(outcome.crossings.len());
        for crossing in &outcome.crossings {
            events.push(self.upload_crossing(clip, settings, crossing).await?);
        }

        if let Some(first) = events.first() {
            if let Err(e) = self.config.set(LATEST_DETECTED_PHOTO_URL, &first.image_url).await {
                tracing::warn!(error = %e, "Failed to update latest detected photo");
            }
        }
        let crossings = events.len();
        for event in events {
            self.bus.publish(event);
        }

        self.backlog.archive(clip).await?;
        tracing::info!(clip = %clip, crossings, "Clip archived");
        Ok(ClipOutcome::Archived { crossings })
    }

    /// Quarantine a clip the tracker cannot open; any other tracker error
    /// leaves it pending.
    async fn tracking_failed(
        &self,
        clip: &str,
        error: TrackerError,
    ) -> Result<ClipOutcome, DetectError> {
        match error {
            TrackerError::StreamNotFound(reason) => {
                tracing::error!(clip = %clip, reason = %reason, "Video stream not found, moving clip to error archive");
                self.backlog.quarantine(clip).await?;
                Ok(ClipOutcome::Quarantined)
            }
            source => Err(DetectError::Tracker {
                clip: clip.to_string(),
                source,
            }),
        }
    }

    async fn upload_crossing(
        &self,
        clip: &str,
        settings: &DetectionSettings,
        crossing: &Crossing,
    ) -> Result<CrossingEvent, DetectError> {
        let image_error = |source| DetectError::Image {
            clip: clip.to_string(),
            source,
        };
        let frame_jpeg = encode_jpeg(&crossing.frame).map_err(image_error)?;
        let crop_jpeg = encode_jpeg(&crossing.composite).map_err(image_error)?;

        let (frame_name, crop_name) =
            artifact_names(&settings.camera_location, crossing.crossed_at, crossing.track_id);
        let metadata = vec![
            ("passeringspunkt".to_string(), settings.camera_location.clone()),
            ("passeringstid".to_string(), crossing_time_text(crossing.crossed_at)),
            ("clip".to_string(), clip.to_string()),
            ("frame".to_string(), crossing.frame_index.to_string()),
            ("track".to_string(), crossing.track_id.to_string()),
            ("confidence".to_string(), format!("{:.3}", crossing.confidence)),
            ("tier".to_string(), crossing.tier.to_string()),
        ];

        let upload_error = |source| DetectError::Upload {
            clip: clip.to_string(),
            source,
        };
        let image_url = self
            .backlog
            .upload_artifact(Artifact {
                folder: DETECT_FOLDER.to_string(),
                file_name: frame_name,
                body: frame_jpeg,
                content_type: JPEG_CONTENT_TYPE.to_string(),
                metadata: metadata.clone(),
            })
            .await
            .map_err(upload_error)?;
        let crop_url = self
            .backlog
            .upload_artifact(Artifact {
                folder: DETECT_FOLDER.to_string(),
                file_name: crop_name,
                body: crop_jpeg,
                content_type: JPEG_CONTENT_TYPE.to_string(),
                metadata,
            })
            .await
            .map_err(upload_error)?;

        Ok(CrossingEvent {
            clip: clip.to_string(),
            track_id: crossing.track_id,
            tier: crossing.tier,
            frame_index: crossing.frame_index,
            crossed_at: crossing.crossed_at,
            camera_location: settings.camera_location.clone(),
            confidence: crossing.confidence,
            box_quality: crossing.box_quality.as_str().to_string(),
            provisional_crops: crossing.provisional_crops,
            image_url,
            crop_url,
        })
    }
}
