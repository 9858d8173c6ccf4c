use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::log::LogFormat;

/// Default directory that receives packed artifacts
pub const DEFAULT_OUTPUT_DIR: &str = "/data/docker-images";

/// Default HTTP listening port
pub const DEFAULT_PORT: u16 = 8082;

/// Default Docker Engine endpoint
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// How long an artifact stays downloadable
pub const FILE_RETENTION: Duration = Duration::from_secs(60 * 60);

/// How often the janitor scans the output directory
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// URL prefix under which artifacts are served
pub const DOWNLOAD_PREFIX: &str = "/download";

/// Image packer configuration.
///
/// Built once at startup and shared read-only by the pipeline, the
/// janitor and the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Directory artifacts are written into and served from
    pub output_dir: PathBuf,

    /// HTTP listening port
    pub port: u16,

    /// Docker Engine endpoint (`unix://...` or `tcp://...`)
    pub docker_host: String,

    /// Maximum artifact age before the janitor removes it
    pub retention: Duration,

    /// Janitor tick period
    pub cleanup_interval: Duration,

    /// Buffered event frames per request before the pipeline waits on the client
    pub event_buffer: usize,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            port: DEFAULT_PORT,
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            retention: FILE_RETENTION,
            cleanup_interval: CLEANUP_INTERVAL,
            event_buffer: 64,
            log_format: LogFormat::Text,
        }
    }
}

impl PackerConfig {
    /// Configuration rooted at the given output directory, defaults elsewhere
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Public download path of an artifact file name
    pub fn download_url(&self, filename: &str) -> String {
        format!("{}/{}", DOWNLOAD_PREFIX, filename)
    }
}
