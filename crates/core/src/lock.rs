//! Lock record format and staleness rule.
//!
//! A lock object is plain text with two lines: the holder id and the
//! acquisition time as Unix seconds (floating point).

use std::time::Duration;

use crate::error::CoreError;

/// How long a lock is honored before another worker may reclaim it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Lock behavior passed to the lock component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Minimum number of lines in a lock record.
const LOCK_RECORD_MIN_LINES: usize = 2;

/// Contents of a `<clip>.lock` object.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
    pub holder_id: String,
    /// Unix time in seconds.
    pub acquired_at: f64,
}

impl LockRecord {
    pub fn new(holder_id: impl Into<String>, acquired_at: f64) -> Self {
        Self {
            holder_id: holder_id.into(),
            acquired_at,
        }
    }

    /// Record for `holder_id` stamped with the current time.
    pub fn now(holder_id: impl Into<String>) -> Self {
        Self::new(holder_id, unix_now())
    }

    /// Serialize as `holder\ntimestamp`.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.holder_id, self.acquired_at)
    }

    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < LOCK_RECORD_MIN_LINES {
            return Err(CoreError::InvalidLockRecord(format!(
                "expected {LOCK_RECORD_MIN_LINES} lines, got {}",
                lines.len()
            )));
        }
        let acquired_at = lines[1]
            .trim()
            .parse::<f64>()
            .map_err(|e| CoreError::InvalidLockRecord(format!("bad timestamp: {e}")))?;
        if !acquired_at.is_finite() {
            return Err(CoreError::InvalidLockRecord(
                "timestamp is not finite".to_string(),
            ));
        }
        Ok(Self::new(lines[0].trim(), acquired_at))
    }

    /// Seconds since acquisition as seen at `now`.
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.acquired_at
    }

    /// Whether the lock has outlived `timeout` at `now` (strictly greater).
    pub fn is_stale(&self, now: f64, timeout: Duration) -> bool {
        self.age_secs(now) > timeout.as_secs_f64()
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
