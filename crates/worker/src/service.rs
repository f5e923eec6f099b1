//! Service loop: poll the mode's start flag and run one unit of work each
//! time it is set.
//!
//! A unit of work is one capture session (until the flag is cleared or
//! the error budget runs out) or one detection drain (until no claimable
//! clip is left). `<MODE>_VIDEO_SERVICE_RUNNING` mirrors whether work is in
//! progress and is reset on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossline_cloud::backlog::Backlog;
use crossline_cloud::error::StorageError;
use crossline_cloud::layout::{KeyLayout, CAPTURE_FOLDER};
use crossline_cloud::local::LocalBacklog;
use crossline_cloud::lock::{default_holder_id, DistributedLock};
use crossline_cloud::s3::S3Backlog;
use crossline_config::http::HttpConfigSource;
use crossline_config::memory::MemoryConfigSource;
use crossline_config::settings::load_capture_settings;
use crossline_config::{ConfigError, ConfigSource};
use crossline_core::lock::LockConfig;
use crossline_events::EventBus;
use crossline_pipeline::capture::{CaptureError, CaptureLoop};
use crossline_pipeline::clip_writer::ClipWriter;
use crossline_pipeline::detect::{DetectError, DetectionWorker};
use crossline_pipeline::ffmpeg::{FfmpegEncoder, FfmpegOpener};
use crossline_pipeline::tracker::SubprocessTracker;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{Mode, StorageMode, WorkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid tracker command: {0:?}")]
    TrackerCommand(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// The work run while the start flag is set.
pub enum Job {
    Capture(CaptureLoop),
    Detect(DetectionWorker),
}

pub struct Service {
    mode: Mode,
    config: Arc<dyn ConfigSource>,
    job: Job,
    poll_interval: Duration,
}

impl Service {
    pub fn new(
        mode: Mode,
        config: Arc<dyn ConfigSource>,
        job: Job,
        poll_interval: Duration,
    ) -> Self {
        Self {
            mode,
            config,
            job,
            poll_interval,
        }
    }

    /// Assemble the service from process configuration.
    pub async fn from_config(cfg: &WorkerConfig, bus: Arc<EventBus>) -> Result<Self, ServiceError> {
        let layout = KeyLayout::new(cfg.event_id.clone());
        let backlog: Arc<dyn Backlog> = match &cfg.storage {
            StorageMode::Local { root } => Arc::new(LocalBacklog::new(root.clone(), layout)),
            StorageMode::Cloud(settings) => {
                Arc::new(S3Backlog::connect(settings.clone(), layout).await?)
            }
        };

        let config: Arc<dyn ConfigSource> = match &cfg.config_service_url {
            Some(url) => Arc::new(HttpConfigSource::new(
                url.clone(),
                cfg.config_api_token.clone(),
                cfg.event_id.clone(),
            )),
            None => {
                tracing::warn!("CONFIG_SERVICE_URL not set, using in-process defaults");
                Arc::new(MemoryConfigSource::new())
            }
        };

        let job = match cfg.mode {
            Mode::Capture => {
                let staging = staging_dir(cfg);
                tracing::info!(staging = %staging.display(), "Clip staging directory");
                let writer = Arc::new(ClipWriter::new(
                    Arc::new(FfmpegEncoder::default()),
                    staging,
                    backlog,
                ));
                Job::Capture(CaptureLoop::new(Arc::new(FfmpegOpener), writer, config.clone()))
            }
            Mode::Detect => {
                let command = cfg.tracker_command.clone().unwrap_or_default();
                let tracker = SubprocessTracker::from_command_line(&command)
                    .ok_or(ServiceError::TrackerCommand(command))?;
                let holder = cfg.worker_id.clone().unwrap_or_else(default_holder_id);
                tracing::info!(holder = %holder, "Detection worker identity");
                let lock = DistributedLock::new(
                    backlog.clone(),
                    holder,
                    LockConfig {
                        timeout: cfg.lock_timeout,
                    },
                );
                Job::Detect(DetectionWorker::new(
                    backlog,
                    lock,
                    Arc::new(tracker),
                    config.clone(),
                    bus,
                ))
            }
        };

        Ok(Self::new(cfg.mode, config, job, cfg.poll_interval))
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            mode = ?self.mode,
            poll_secs = self.poll_interval.as_secs(),
            "Service started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Service stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(&cancel).await {
                        tracing::error!(mode = ?self.mode, error = %e, "Service run failed");
                    }
                }
            }
        }

        self.set_running(false).await;
    }

    /// Check the start flag and run the job if it is set. Returns whether
    /// the job ran.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<bool, ServiceError> {
        if !self.config.get_bool(self.mode.start_key()).await? {
            if self.config.get_bool(self.mode.running_key()).await.unwrap_or(false) {
                tracing::info!(mode = ?self.mode, "Clearing stale running flag");
                self.set_running(false).await;
            }
            return Ok(false);
        }

        self.set_running(true).await;
        let result = self.run_job(cancel).await;
        self.set_running(false).await;
        result.map(|()| true)
    }

    async fn run_job(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        match &self.job {
            Job::Capture(capture) => {
                let settings = load_capture_settings(self.config.as_ref()).await?;
                let report = capture.run(&settings, cancel.clone()).await?;
                tracing::info!(
                    clips = report.clips_written.len(),
                    write_errors = report.write_errors.len(),
                    stop_reason = ?report.stop_reason,
                    "Capture session ended"
                );
            }
            Job::Detect(worker) => {
                let report = worker.drain(cancel).await?;
                if report.archived + report.quarantined + report.failed > 0 {
                    tracing::info!(
                        archived = report.archived,
                        quarantined = report.quarantined,
                        failed = report.failed,
                        crossings = report.crossings,
                        "Backlog drained"
                    );
                }
            }
        }
        Ok(())
    }

    async fn set_running(&self, running: bool) {
        if let Err(e) = self.config.set_bool(self.mode.running_key(), running).await {
            tracing::warn!(running, error = %e, "Failed to update running flag");
        }
    }
}

/// Local mode writes straight into the pending directory so publishing is
/// a no-op; cloud mode stages in a scratch directory.
fn staging_dir(cfg: &WorkerConfig) -> PathBuf {
    if let Some(dir) = &cfg.capture_staging_dir {
        return dir.clone();
    }
    match &cfg.storage {
        StorageMode::Local { root } => root.join(&cfg.event_id).join(CAPTURE_FOLDER),
        StorageMode::Cloud(_) => std::env::temp_dir().join("crossline-staging"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
