//! Retention janitor: periodically removes expired artifacts.
//!
//! Runs as a single background task next to the request pipelines. It only
//! ever deletes files older than the retention window, and skips any file
//! whose write-window lock is still present.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use packer_core::config::PackerConfig;

use crate::artifact::{is_lock_file, lock_path_for};

/// Outcome of one directory sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files looked at
    pub examined: usize,
    /// Names of files deleted
    pub removed: Vec<String>,
    /// Expired files left alone because their lock is present
    pub skipped_locked: usize,
    /// Listing, stat or delete failures
    pub errors: usize,
}

/// Deletes artifacts older than the retention window on a fixed schedule.
#[derive(Debug, Clone)]
pub struct RetentionJanitor {
    dir: PathBuf,
    retention: Duration,
    interval: Duration,
}

impl RetentionJanitor {
    pub fn new(config: &PackerConfig) -> Self {
        Self {
            dir: config.output_dir.clone(),
            retention: config.retention,
            interval: config.cleanup_interval,
        }
    }

    /// Start the sweep loop on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep once per interval, forever. The first sweep happens one full
    /// interval after start.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            dir = %self.dir.display(),
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Retention janitor started"
        );

        loop {
            ticker.tick().await;
            let report = self.sweep().await;
            tracing::debug!(
                examined = report.examined,
                removed = report.removed.len(),
                skipped_locked = report.skipped_locked,
                errors = report.errors,
                "Retention sweep finished"
            );
        }
    }

    /// Sweep the directory now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep the directory as if the current time were `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list artifact directory");
                report.errors += 1;
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to read directory entry");
                    report.errors += 1;
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Failed to stat artifact");
                    report.errors += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            report.examined += 1;

            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Artifact has no modification time");
                    report.errors += 1;
                    continue;
                }
            };

            // A modification time in the future counts as fresh.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.retention {
                continue;
            }

            if !is_lock_file(&name)
                && tokio::fs::try_exists(lock_path_for(&path))
                    .await
                    .unwrap_or(false)
            {
                tracing::debug!(file = %name, "Skipping expired artifact still being written");
                report.skipped_locked += 1;
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!(file = %name, age_secs = age.as_secs(), "Removed expired artifact");
                    report.removed.push(name);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Failed to remove expired artifact");
                    report.errors += 1;
                }
            }
        }

        report
    }
}
