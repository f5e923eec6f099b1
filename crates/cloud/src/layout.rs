//! Storage key layout shared by every backlog implementation.
//!
//! ```text
//! <event>/CAPTURE/<clip>            pending clips
//! <event>/CAPTURE/<clip>.lock       claims on pending clips
//! <event>/CAPTURE_ARCHIVE/<clip>    processed clips
//! <event>/CAPTURE_ERROR/<clip>      clips the tracker could not open
//! <event>/DETECT/<artifact>         crossing imagery
//! ```

use crossline_core::clip::lock_path;

pub const CAPTURE_FOLDER: &str = "CAPTURE";
pub const ARCHIVE_FOLDER: &str = "CAPTURE_ARCHIVE";
pub const ERROR_FOLDER: &str = "CAPTURE_ERROR";
pub const DETECT_FOLDER: &str = "DETECT";

/// Key builder for one event's objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    event_id: String,
}

impl KeyLayout {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// `<event>/<folder>/`
    pub fn folder_prefix(&self, folder: &str) -> String {
        format!("{}/{folder}/", self.event_id)
    }

    pub fn pending_prefix(&self) -> String {
        self.folder_prefix(CAPTURE_FOLDER)
    }

    pub fn key(&self, folder: &str, file_name: &str) -> String {
        format!("{}{file_name}", self.folder_prefix(folder))
    }

    pub fn pending_key(&self, clip: &str) -> String {
        self.key(CAPTURE_FOLDER, clip)
    }

    pub fn archive_key(&self, clip: &str) -> String {
        self.key(ARCHIVE_FOLDER, clip)
    }

    pub fn error_key(&self, clip: &str) -> String {
        self.key(ERROR_FOLDER, clip)
    }

    pub fn lock_key(&self, clip: &str) -> String {
        lock_path(&self.pending_key(clip))
    }
}

/// Final path component of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
