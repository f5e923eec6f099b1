//! Crossing events and their in-process distribution.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`CrossingEvent`]: one person crossing the trigger line in one clip.
//! - [`EventJournal`]: background subscriber appending every event to a
//!   JSON-lines file.

pub mod bus;
pub mod journal;

pub use bus::{CrossingEvent, EventBus};
pub use journal::EventJournal;
