/// Detector-assigned track identity, scoped to one clip's analysis pass.
pub type TrackId = i64;

/// 1-based index of a frame within a clip.
pub type FrameIndex = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// COCO class id of a person, the only class crossings are reported for.
pub const PERSON_CLASS_ID: u32 = 0;
