//! Scoring of one clip.
//!
//! A [`DetectionSession`] owns the per-clip [`TrackState`] and movement
//! statistics. Frames are fed in order; tracks reaching tier 100 are kept as
//! candidates with their imagery. When the clip ends, candidates from
//! tracks the movement filter deems stationary are dropped.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use crossline_core::classifier::{classify, BoxQuality, Tier};
use crossline_core::clip::ClipName;
use crossline_core::error::CoreError;
use crossline_core::movement::MovementStats;
use crossline_core::settings::DetectionSettings;
use crossline_core::track_state::{TierUpdate, TrackState};
use crossline_core::types::{FrameIndex, TrackId, PERSON_CLASS_ID};
use image::RgbImage;

use crate::imagery::{composite, crop};
use crate::tracker::{TrackedBox, TrackedFrame};

/// A track that reached tier 100, with everything needed to report it.
#[derive(Debug, Clone)]
pub struct Crossing {
    pub track_id: TrackId,
    pub tier: Tier,
    pub frame_index: FrameIndex,
    pub crossed_at: DateTime<Utc>,
    pub confidence: f64,
    pub box_quality: BoxQuality,
    /// Number of 80/90 crops merged into `composite`.
    pub provisional_crops: usize,
    pub frame: RgbImage,
    pub composite: RgbImage,
}

/// Result of scoring one clip.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Crossings in the order they happened.
    pub crossings: Vec<Crossing>,
    /// Tracks removed by the movement filter.
    pub stationary_tracks: HashSet<TrackId>,
    pub frames_scored: u64,
}

pub struct DetectionSession<'a> {
    clip: ClipName,
    settings: &'a DetectionSettings,
    frame_rate: f64,
    state: TrackState<RgbImage>,
    movement: MovementStats,
    crossings: Vec<Crossing>,
    frames_scored: u64,
}

impl<'a> DetectionSession<'a> {
    pub fn new(
        clip_file: &str,
        settings: &'a DetectionSettings,
        frame_rate: f64,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            clip: ClipName::parse(clip_file)?,
            settings,
            frame_rate,
            state: TrackState::new(),
            movement: MovementStats::new(),
            crossings: Vec::new(),
            frames_scored: 0,
        })
    }

    /// Whether a box is a tracked person above the confidence threshold.
    fn considered(&self, tracked: &TrackedBox) -> Option<TrackId> {
        if tracked.class_id != PERSON_CLASS_ID || tracked.confidence < self.settings.min_confidence {
            return None;
        }
        tracked.track_id
    }

    /// Score one frame.
    pub fn observe(&mut self, frame: &TrackedFrame) {
        self.frames_scored += 1;

        for tracked in &frame.boxes {
            let Some(track_id) = self.considered(tracked) else {
                continue;
            };
            self.movement
                .observe(frame.index, track_id, tracked.bbox.center());

            let quality = self.settings.box_limits.check(&tracked.bbox);
            if !quality.is_accepted() {
                continue;
            }
            let Some(tier) = classify(&tracked.bbox, &self.settings.trigger_line) else {
                continue;
            };

            let update = self
                .state
                .record(track_id, tier, || crop(&frame.image, &tracked.bbox));
            match update {
                TierUpdate::Staged(tier) => {
                    tracing::debug!(track_id, %tier, frame = frame.index, "Track staged");
                }
                TierUpdate::Crossed { crops } => {
                    let crossed_at = self.clip.frame_time(frame.index, self.frame_rate);
                    tracing::info!(
                        clip = %self.clip.file_name(),
                        track_id,
                        frame = frame.index,
                        "Line crossing"
                    );
                    self.crossings.push(Crossing {
                        track_id,
                        tier,
                        frame_index: frame.index,
                        crossed_at,
                        confidence: tracked.confidence,
                        box_quality: quality,
                        provisional_crops: crops.len().saturating_sub(1),
                        frame: frame.image.clone(),
                        composite: composite(&crops),
                    });
                }
                TierUpdate::AlreadyStaged | TierUpdate::AlreadyCrossed => {}
            }
        }
    }

    /// Apply the movement filter and return the surviving crossings.
    pub fn finish(self) -> SessionOutcome {
        let stationary = self.movement.stationary_tracks(self.settings.movement_fraction);
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .crossings
            .into_iter()
            .partition(|c| !stationary.contains(&c.track_id));
        for crossing in &dropped {
            tracing::info!(track_id = crossing.track_id, "Dropping crossing of stationary track");
        }
        SessionOutcome {
            crossings: kept,
            stationary_tracks: stationary,
            frames_scored: self.frames_scored,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
