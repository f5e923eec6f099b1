use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crossline_cloud::s3::S3Settings;
use crossline_core::lock::DEFAULT_LOCK_TIMEOUT;
use crossline_core::settings::{
    parse_bool, CAPTURE_VIDEO_SERVICE_RUNNING, CAPTURE_VIDEO_SERVICE_START,
    DETECT_VIDEO_SERVICE_RUNNING, DETECT_VIDEO_SERVICE_START,
};

/// Default interval between start-flag polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default local backlog root.
const DEFAULT_STORAGE_ROOT: &str = "./data";

#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Capture,
    Detect,
}

impl Mode {
    pub fn start_key(self) -> &'static str {
        match self {
            Self::Capture => CAPTURE_VIDEO_SERVICE_START,
            Self::Detect => DETECT_VIDEO_SERVICE_START,
        }
    }

    pub fn running_key(self) -> &'static str {
        match self {
            Self::Capture => CAPTURE_VIDEO_SERVICE_RUNNING,
            Self::Detect => DETECT_VIDEO_SERVICE_RUNNING,
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CAPTURE" => Ok(Self::Capture),
            "DETECT" => Ok(Self::Detect),
            _ => Err(()),
        }
    }
}

/// Where clips and artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Local { root: PathBuf },
    Cloud(S3Settings),
}

/// Process configuration loaded from environment variables.
///
/// | Env Var               | Default                      |
/// |-----------------------|------------------------------|
/// | `MODE`                | required (`CAPTURE`/`DETECT`)|
/// | `EVENT_ID`            | required                     |
/// | `STORAGE_MODE`        | `local_storage`              |
/// | `STORAGE_ROOT`        | `./data`                     |
/// | `CAPTURE_STAGING_DIR` | pending dir (local), temp dir (cloud) |
/// | `S3_BUCKET`           | required for `cloud_storage` |
/// | `S3_ENDPOINT_URL`     | AWS                          |
/// | `S3_FORCE_PATH_STYLE` | `false`                      |
/// | `CONFIG_SERVICE_URL`  | unset: in-process defaults   |
/// | `CONFIG_API_TOKEN`    | empty                        |
/// | `TRACKER_COMMAND`     | required for `DETECT`        |
/// | `WORKER_ID`           | `instance-<pid>-<random>`    |
/// | `POLL_INTERVAL_SECS`  | `5`                          |
/// | `LOCK_TIMEOUT_SECS`   | `300`                        |
/// | `CROSSING_JOURNAL`    | unset: no journal            |
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub mode: Mode,
    pub event_id: String,
    pub storage: StorageMode,
    pub capture_staging_dir: Option<PathBuf>,
    pub config_service_url: Option<String>,
    pub config_api_token: String,
    pub tracker_command: Option<String>,
    pub worker_id: Option<String>,
    pub poll_interval: Duration,
    pub lock_timeout: Duration,
    pub crossing_journal: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkerConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode_raw = get("MODE").ok_or(WorkerConfigError::Missing("MODE"))?;
        let mode: Mode = mode_raw.parse().map_err(|_| WorkerConfigError::Invalid {
            key: "MODE",
            value: mode_raw.clone(),
        })?;

        let event_id = get("EVENT_ID").ok_or(WorkerConfigError::Missing("EVENT_ID"))?;

        let storage = match get("STORAGE_MODE").as_deref().unwrap_or("local_storage") {
            "local_storage" => StorageMode::Local {
                root: get("STORAGE_ROOT")
                    .unwrap_or_else(|| DEFAULT_STORAGE_ROOT.into())
                    .into(),
            },
            "cloud_storage" => StorageMode::Cloud(S3Settings {
                bucket: get("S3_BUCKET").ok_or(WorkerConfigError::Missing("S3_BUCKET"))?,
                endpoint_url: get("S3_ENDPOINT_URL"),
                force_path_style: get("S3_FORCE_PATH_STYLE").is_some_and(|v| parse_bool(&v)),
            }),
            other => {
                return Err(WorkerConfigError::Invalid {
                    key: "STORAGE_MODE",
                    value: other.to_string(),
                })
            }
        };

        let tracker_command = get("TRACKER_COMMAND");
        if mode == Mode::Detect && tracker_command.is_none() {
            return Err(WorkerConfigError::Missing("TRACKER_COMMAND"));
        }

        Ok(Self {
            mode,
            event_id,
            storage,
            capture_staging_dir: get("CAPTURE_STAGING_DIR").map(PathBuf::from),
            config_service_url: get("CONFIG_SERVICE_URL"),
            config_api_token: get("CONFIG_API_TOKEN").unwrap_or_default(),
            tracker_command,
            worker_id: get("WORKER_ID"),
            poll_interval: Duration::from_secs(secs(
                &get,
                "POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            lock_timeout: Duration::from_secs(secs(
                &get,
                "LOCK_TIMEOUT_SECS",
                DEFAULT_LOCK_TIMEOUT.as_secs(),
            )?),
            crossing_journal: get("CROSSING_JOURNAL").map(PathBuf::from),
        })
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, WorkerConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(WorkerConfigError::Invalid { key, value }),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
