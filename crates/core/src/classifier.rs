//! Trigger-line crossing classifier and detection box pre-filter.
//!
//! [`classify`] is a pure function of a box and a line. It compares the
//! box's bottom edge at its horizontal center against the line and two
//! relaxed thresholds, yielding a [`Tier`]. [`BoxLimits::check`] rejects
//! boxes whose size makes them unlikely to be a person.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geometry::{NormBox, TriggerLine};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Intercept scale for the 90% staging threshold.
pub const TIER_90_SCALE: f64 = 0.9;

/// Intercept scale for the 80% staging threshold.
pub const TIER_80_SCALE: f64 = 0.8;

/// Boxes narrower or shorter than this fraction of the frame are undersized.
pub const DEFAULT_MIN_BOX_FRACTION: f64 = 0.08;

/// Boxes wider or taller than this fraction of the frame are rejected.
pub const DEFAULT_MAX_BOX_FRACTION: f64 = 0.9;

/// Distance from the right/bottom border that counts as touching the edge.
pub const DEFAULT_EDGE_MARGIN: f64 = 0.02;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Confidence stage of a tracked object relative to the trigger line.
///
/// `T100` is a reportable crossing; `T80` and `T90` are provisional
/// stages kept only to build the composite crop image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    T80,
    T90,
    T100,
}

impl Tier {
    /// Numeric percentage used in logs, metadata and file names.
    pub fn percent(self) -> u8 {
        match self {
            Self::T80 => 80,
            Self::T90 => 90,
            Self::T100 => 100,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::T100)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.percent()
    }
}

impl TryFrom<u8> for Tier {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            80 => Ok(Self::T80),
            90 => Ok(Self::T90),
            100 => Ok(Self::T100),
            other => Err(CoreError::Validation(format!("Unknown tier {other}"))),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.percent())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a normalized box against the trigger line.
///
/// Returns `None` when the box center lies outside the line's x-span or
/// its bottom edge is above the 80% threshold.
pub fn classify(bbox: &NormBox, line: &TriggerLine) -> Option<Tier> {
    let xc = bbox.center_x();
    if !line.spans(xc) {
        return None;
    }

    let yb = bbox.bottom();
    if yb > line.y_at(xc, 1.0) {
        Some(Tier::T100)
    } else if yb > line.y_at(xc, TIER_90_SCALE) {
        Some(Tier::T90)
    } else if yb > line.y_at(xc, TIER_80_SCALE) {
        Some(Tier::T80)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Box validity
// ---------------------------------------------------------------------------

/// Outcome of the box size pre-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxQuality {
    /// Within the configured size window.
    Normal,
    /// Undersized but clear of the frame edge; accepted at reduced confidence.
    Reduced,
    /// Not a usable detection.
    Rejected,
}

impl BoxQuality {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reduced => "reduced",
            Self::Rejected => "rejected",
        }
    }
}

/// Size window for plausible person boxes, in fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxLimits {
    pub min_fraction: f64,
    pub max_fraction: f64,
    pub edge_margin: f64,
}

impl Default for BoxLimits {
    fn default() -> Self {
        Self {
            min_fraction: DEFAULT_MIN_BOX_FRACTION,
            max_fraction: DEFAULT_MAX_BOX_FRACTION,
            edge_margin: DEFAULT_EDGE_MARGIN,
        }
    }
}

impl BoxLimits {
    /// Grade a box against the size window.
    ///
    /// - Oversized in either dimension: rejected.
    /// - Undersized and touching the right or bottom edge: rejected (a
    ///   person partly outside the frame).
    /// - Undersized elsewhere: accepted at reduced confidence.
    pub fn check(&self, bbox: &NormBox) -> BoxQuality {
        let width = bbox.width();
        let height = bbox.height();

        if width > self.max_fraction || height > self.max_fraction {
            return BoxQuality::Rejected;
        }

        if width < self.min_fraction || height < self.min_fraction {
            let at_edge =
                bbox.x2 > 1.0 - self.edge_margin || bbox.y2 > 1.0 - self.edge_margin;
            if at_edge {
                return BoxQuality::Rejected;
            }
            return BoxQuality::Reduced;
        }

        BoxQuality::Normal
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
