//! Track movement filter.
//!
//! The detector occasionally produces tracks that never move (shadows,
//! posters, parked objects). [`MovementStats`] accumulates per-track
//! displacement over a clip and flags tracks whose average per-frame
//! speed is below a fraction of the mean speed of all tracks.

use std::collections::{HashMap, HashSet};

use crate::types::{FrameIndex, TrackId};

/// Fraction of the mean track speed below which a track is stationary.
pub const DEFAULT_MOVEMENT_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct TrackMotion {
    last_frame: FrameIndex,
    last_center: (f64, f64),
    distance: f64,
    frame_gap: u64,
}

impl TrackMotion {
    fn average_speed(&self) -> f64 {
        if self.frame_gap == 0 {
            0.0
        } else {
            self.distance / self.frame_gap as f64
        }
    }
}

/// Running displacement totals, keyed by track id.
///
/// Observations for a track must arrive in frame order.
#[derive(Debug, Default, Clone)]
pub struct MovementStats {
    tracks: HashMap<TrackId, TrackMotion>,
}

impl MovementStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a track's center at `frame`.
    pub fn observe(&mut self, frame: FrameIndex, track_id: TrackId, center: (f64, f64)) {
        match self.tracks.get_mut(&track_id) {
            Some(motion) => {
                let dx = center.0 - motion.last_center.0;
                let dy = center.1 - motion.last_center.1;
                motion.distance += (dx * dx + dy * dy).sqrt();
                motion.frame_gap += frame.saturating_sub(motion.last_frame);
                motion.last_frame = frame;
                motion.last_center = center;
            }
            None => {
                self.tracks.insert(
                    track_id,
                    TrackMotion {
                        last_frame: frame,
                        last_center: center,
                        distance: 0.0,
                        frame_gap: 0,
                    },
                );
            }
        }
    }

    /// Average displacement per frame for one track, `None` if never seen.
    ///
    /// A track seen only once, or only within a single frame, has speed 0.
    pub fn average_speed(&self, track_id: TrackId) -> Option<f64> {
        self.tracks.get(&track_id).map(TrackMotion::average_speed)
    }

    /// Speed below which a track counts as stationary.
    ///
    /// `fraction` times the mean of all average speeds; 0 when there are no
    /// tracks or nothing moves, which disables filtering.
    pub fn threshold(&self, fraction: f64) -> f64 {
        if self.tracks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.tracks.values().map(TrackMotion::average_speed).sum();
        let mean = total / self.tracks.len() as f64;
        if mean == 0.0 {
            0.0
        } else {
            fraction * mean
        }
    }

    /// Tracks whose average speed is strictly below [`threshold`](Self::threshold).
    pub fn stationary_tracks(&self, fraction: f64) -> HashSet<TrackId> {
        let threshold = self.threshold(fraction);
        self.tracks
            .iter()
            .filter(|(_, motion)| motion.average_speed() < threshold)
            .map(|(id, _)| *id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Ten frames: track 1 sits still, track 2 moves 0.5 units in total.
    fn still_and_moving() -> MovementStats {
        let mut stats = MovementStats::new();
        for i in 1..=10u64 {
            stats.observe(i, 1, (0.3, 0.3));
            stats.observe(i, 2, (0.2 + 0.5 * (i - 1) as f64 / 9.0, 0.6));
        }
        stats
    }

    #[test]
    fn stationary_track_flagged_for_any_positive_fraction() {
        let stats = still_and_moving();
        for fraction in [0.01, 0.05, 0.1, 0.25, 0.5, 1.0] {
            let stationary = stats.stationary_tracks(fraction);
            assert_eq!(stationary, HashSet::from([1]), "fraction {fraction}");
        }
    }

    #[test]
    fn average_speed_is_distance_over_frame_gap() {
        let mut stats = MovementStats::new();
        stats.observe(1, 7, (0.0, 0.0));
        stats.observe(3, 7, (0.3, 0.4));
        // distance 0.5 over 2 frames
        assert!((stats.average_speed(7).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn single_observation_has_zero_speed() {
        let mut stats = MovementStats::new();
        stats.observe(4, 1, (0.5, 0.5));
        assert_eq!(stats.average_speed(1), Some(0.0));
        assert_eq!(stats.average_speed(2), None);
    }

    #[test]
    fn nothing_moving_disables_filtering() {
        let mut stats = MovementStats::new();
        for i in 1..=5u64 {
            stats.observe(i, 1, (0.1, 0.1));
            stats.observe(i, 2, (0.9, 0.9));
        }
        assert_eq!(stats.threshold(DEFAULT_MOVEMENT_FRACTION), 0.0);
        assert!(stats.stationary_tracks(DEFAULT_MOVEMENT_FRACTION).is_empty());
    }

    #[test]
    fn zero_fraction_keeps_everything() {
        assert!(still_and_moving().stationary_tracks(0.0).is_empty());
    }

    #[test]
    fn slow_but_moving_track_survives_default_fraction() {
        let mut stats = MovementStats::new();
        for i in 1..=10u64 {
            stats.observe(i, 1, (0.1 + 0.01 * i as f64, 0.5)); // 0.01 / frame
            stats.observe(i, 2, (0.1 + 0.05 * i as f64, 0.5)); // 0.05 / frame
        }
        // mean 0.03, threshold 0.003
        assert!(stats.stationary_tracks(DEFAULT_MOVEMENT_FRACTION).is_empty());
    }

    #[test]
    fn frame_gaps_are_accounted() {
        let mut stats = MovementStats::new();
        stats.observe(1, 1, (0.0, 0.0));
        stats.observe(11, 1, (1.0, 0.0));
        assert!((stats.average_speed(1).unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn no_tracks() {
        let stats = MovementStats::new();
        assert_eq!(stats.threshold(0.1), 0.0);
        assert!(stats.stationary_tracks(DEFAULT_MOVEMENT_FRACTION).is_empty());
    }
}
