//! Per-clip crossing state.
//!
//! [`TrackState`] is owned by the detection session for exactly one clip.
//! It remembers the first crop seen for each track in the provisional 80
//! and 90 tiers and which tracks have already produced a crossing, so that
//! each track yields at most one crossing per clip.

use std::collections::{HashMap, HashSet};

use crate::classifier::Tier;
use crate::types::TrackId;

/// What a tier observation did to the state.
#[derive(Debug, PartialEq)]
pub enum TierUpdate<C> {
    /// First time this track was seen in a provisional tier; crop stored.
    Staged(Tier),
    /// Provisional crop for this track and tier already held.
    AlreadyStaged,
    /// Track reached tier 100 for the first time. Carries the buffered
    /// provisional crops in tier order (80 before 90) followed by the
    /// final crop.
    Crossed { crops: Vec<C> },
    /// Track had already crossed in this clip.
    AlreadyCrossed,
}

/// Crossing accumulator scoped to one clip. `C` is the crop payload.
#[derive(Debug)]
pub struct TrackState<C> {
    pending_80: HashMap<TrackId, C>,
    pending_90: HashMap<TrackId, C>,
    crossed: HashSet<TrackId>,
}

impl<C> Default for TrackState<C> {
    fn default() -> Self {
        Self {
            pending_80: HashMap::new(),
            pending_90: HashMap::new(),
            crossed: HashSet::new(),
        }
    }
}

impl<C> TrackState<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one classified observation of `track_id`.
    ///
    /// `crop` is only invoked when the observation needs a new crop
    /// (first provisional sighting of a tier, or the crossing itself).
    pub fn record(
        &mut self,
        track_id: TrackId,
        tier: Tier,
        crop: impl FnOnce() -> C,
    ) -> TierUpdate<C> {
        if self.crossed.contains(&track_id) {
            return TierUpdate::AlreadyCrossed;
        }

        match tier {
            Tier::T80 | Tier::T90 => {
                let pending = if tier == Tier::T80 {
                    &mut self.pending_80
                } else {
                    &mut self.pending_90
                };
                if pending.contains_key(&track_id) {
                    TierUpdate::AlreadyStaged
                } else {
                    pending.insert(track_id, crop());
                    TierUpdate::Staged(tier)
                }
            }
            Tier::T100 => {
                self.crossed.insert(track_id);
                let mut crops = Vec::with_capacity(3);
                crops.extend(self.pending_80.remove(&track_id));
                crops.extend(self.pending_90.remove(&track_id));
                crops.push(crop());
                TierUpdate::Crossed { crops }
            }
        }
    }

    pub fn has_crossed(&self, track_id: TrackId) -> bool {
        self.crossed.contains(&track_id)
    }

    pub fn crossed_count(&self) -> usize {
        self.crossed.len()
    }

    /// Number of provisional crops still waiting for a crossing.
    pub fn pending_count(&self) -> usize {
        self.pending_80.len() + self.pending_90.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
