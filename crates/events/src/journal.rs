//! Append-only JSON-lines record of crossing events.
//!
//! [`EventJournal`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes one line per event. It runs as a long-lived background task
//! and stops when the bus is dropped.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::bus::CrossingEvent;

pub struct EventJournal;

impl EventJournal {
    /// Run the journal loop until the channel closes.
    pub async fn run(path: PathBuf, mut receiver: broadcast::Receiver<CrossingEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    tracing::info!(
                        clip = %event.clip,
                        track_id = event.track_id,
                        crossed_at = %event.crossed_at,
                        camera_location = %event.camera_location,
                        "Crossing"
                    );
                    if let Err(e) = Self::append(&path, &event).await {
                        tracing::error!(
                            error = %e,
                            path = %path.display(),
                            "Failed to journal crossing event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event journal lagged, some crossings were not written");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, journal shutting down");
                    break;
                }
            }
        }
    }

    async fn append(path: &Path, event: &CrossingEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
