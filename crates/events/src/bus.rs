//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the detection loop
//! and whatever consumes crossings.

use chrono::{DateTime, Utc};
use crossline_core::classifier::Tier;
use crossline_core::types::{FrameIndex, TrackId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// CrossingEvent
// ---------------------------------------------------------------------------

/// A track that reached tier 100 in a clip.
///
/// Identity is `(clip, track_id, tier)`. Reprocessing a clip after a lock
/// reclaim yields the same identity, so consumers can deduplicate on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    /// Source clip file name.
    pub clip: String,
    pub track_id: TrackId,
    pub tier: Tier,
    /// 1-based frame within the clip.
    pub frame_index: FrameIndex,
    /// Clip start plus frame offset.
    pub crossed_at: DateTime<Utc>,
    pub camera_location: String,
    /// Detector confidence of the crossing box.
    pub confidence: f64,
    /// `normal` or `reduced` (undersized box away from the frame edge).
    pub box_quality: String,
    /// Provisional crops (80/90) merged into the composite.
    pub provisional_crops: usize,
    pub image_url: String,
    pub crop_url: String,
}

impl CrossingEvent {
    /// Deduplication key for at-least-once consumers.
    pub fn dedup_key(&self) -> String {
        format!("{}#{}#{}", self.clip, self.track_id, self.tier.percent())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for [`CrossingEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<CrossingEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: CrossingEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrossingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
