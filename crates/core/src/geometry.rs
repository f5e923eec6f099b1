//! Normalized image-space geometry: bounding boxes and the trigger line.
//!
//! All coordinates live in unit image space, `(0, 0)` top-left and
//! `(1, 1)` bottom-right, so the same configuration applies regardless
//! of the analysis resolution.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Number of colon-separated coordinates in a trigger line config value.
const TRIGGER_LINE_COORDINATES: usize = 4;

// ---------------------------------------------------------------------------
// NormBox
// ---------------------------------------------------------------------------

/// Axis-aligned bounding box in normalized `(x1, y1, x2, y2)` form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl NormBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Horizontal center of the box.
    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    /// Geometric center of the box, used for movement estimation.
    pub fn center(&self) -> (f64, f64) {
        (self.center_x(), (self.y1 + self.y2) / 2.0)
    }

    /// Bottom edge of the box (the "feet" of a standing person).
    pub fn bottom(&self) -> f64 {
        self.y2
    }

    /// Scale to pixel coordinates for a `width` x `height` frame.
    ///
    /// The result is clamped to the frame and always at least one pixel
    /// wide and tall, so it can be used directly as a crop rectangle.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let clamp = |v: f64, max: u32| (v.max(0.0) * max as f64).min(max as f64) as u32;
        let x = clamp(self.x1, width).min(width.saturating_sub(1));
        let y = clamp(self.y1, height).min(height.saturating_sub(1));
        let x2 = clamp(self.x2, width).max(x + 1).min(width.max(1));
        let y2 = clamp(self.y2, height).max(y + 1).min(height.max(1));
        PixelRect {
            x,
            y,
            width: x2.saturating_sub(x).max(1),
            height: y2.saturating_sub(y).max(1),
        }
    }
}

/// Integer crop rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
// TriggerLine
// ---------------------------------------------------------------------------

/// Line segment in normalized image space that people are counted
/// crossing. Invariant: `x2 > x1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerLine {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl TriggerLine {
    /// Build a line, rejecting segments that are vertical or run right-to-left.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, CoreError> {
        if [x1, y1, x2, y2].iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Validation(
                "Trigger line coordinates must be finite numbers".to_string(),
            ));
        }
        if x2 <= x1 {
            return Err(CoreError::Validation(format!(
                "Trigger line must run left to right (x2 > x1), got x1={x1} x2={x2}"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Parse the `x1:y1:x2:y2` configuration format.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let coordinates = value
            .split(':')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                CoreError::Validation(format!("Error reading trigger line '{value}': {e}"))
            })?;

        if coordinates.len() != TRIGGER_LINE_COORDINATES {
            return Err(CoreError::Validation(format!(
                "Trigger line must have {TRIGGER_LINE_COORDINATES} numbers, colon-separated, got '{value}'"
            )));
        }

        Self::new(coordinates[0], coordinates[1], coordinates[2], coordinates[3])
    }

    /// Slope of the line in normalized units.
    pub fn slope(&self) -> f64 {
        (self.y2 - self.y1) / (self.x2 - self.x1)
    }

    /// Whether `x` lies within the line's horizontal span (inclusive).
    pub fn spans(&self, x: f64) -> bool {
        x >= self.x1 && x <= self.x2
    }

    /// Line y-value at `x`, with the y-intercept scaled by `intercept_scale`.
    ///
    /// `intercept_scale = 1.0` gives the line itself. The relaxed tiers use
    /// 0.9 and 0.8, which scales `y1` only and keeps the slope; this is not
    /// a parallel offset of the line.
    pub fn y_at(&self, x: f64, intercept_scale: f64) -> f64 {
        self.slope() * (x - self.x1) + self.y1 * intercept_scale
    }
}

impl std::fmt::Display for TriggerLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}:{}", self.x1, self.y1, self.x2, self.y2)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_trigger_line() {
        let line = TriggerLine::parse("0.1:0.5:0.9:0.6").unwrap();
        assert_eq!(line, TriggerLine::new(0.1, 0.5, 0.9, 0.6).unwrap());
    }

    #[test]
    fn parse_trigger_line_tolerates_whitespace() {
        assert!(TriggerLine::parse(" 0.1 : 0.5:0.9 :0.5").is_ok());
    }

    #[test]
    fn parse_trigger_line_wrong_count() {
        assert_matches!(TriggerLine::parse("0.1:0.5:0.9"), Err(CoreError::Validation(_)));
        assert_matches!(
            TriggerLine::parse("0.1:0.5:0.9:0.5:0.2"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn parse_trigger_line_not_numeric() {
        assert_matches!(TriggerLine::parse("a:b:c:d"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn trigger_line_must_run_left_to_right() {
        assert!(TriggerLine::new(0.9, 0.5, 0.1, 0.5).is_err());
        assert!(TriggerLine::new(0.5, 0.1, 0.5, 0.9).is_err());
    }

    #[test]
    fn y_at_scales_intercept_not_line() {
        let line = TriggerLine::new(0.2, 0.5, 0.8, 0.8).unwrap();
        // slope 0.5, at x=0.4 the line is at 0.6
        assert!((line.y_at(0.4, 1.0) - 0.6).abs() < 1e-9);
        // intercept scaled only: 0.5*0.2 + 0.5*0.8 = 0.5
        assert!((line.y_at(0.4, 0.8) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let line = TriggerLine::new(0.1, 0.5, 0.9, 0.55).unwrap();
        assert_eq!(TriggerLine::parse(&line.to_string()).unwrap(), line);
    }

    #[test]
    fn to_pixels_clamps_to_frame() {
        let rect = NormBox::new(-0.1, 0.5, 1.2, 1.0).to_pixels(100, 50);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 25);
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 25);
    }

    #[test]
    fn to_pixels_never_empty() {
        let rect = NormBox::new(0.5, 0.5, 0.5, 0.5).to_pixels(10, 10);
        assert_eq!(rect.width, 1);
        assert_eq!(rect.height, 1);
    }
}
