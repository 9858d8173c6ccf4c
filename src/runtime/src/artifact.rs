//! Artifact naming, exclusive creation and write-window locks.
//!
//! Artifacts are named `<safe-reference>_<unix-millis>.tar`. The `.tar`
//! extension is kept even though the content is gzip: `docker load`
//! detects the compression itself, and the advertised load command relies
//! on that name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};

/// Extension advertised on every artifact.
pub const ARTIFACT_EXTENSION: &str = "tar";

/// Suffix of the sibling file marking an artifact still being written.
pub const LOCK_SUFFIX: &str = ".lock";

/// Attempts at finding a free name before giving up.
const MAX_CREATE_ATTEMPTS: u32 = 64;

/// An artifact file owned by a running pipeline.
///
/// Holds the write-window lock; the lock file is removed when this is dropped.
#[derive(Debug)]
pub struct ArtifactFile {
    path: PathBuf,
    filename: String,
    lock_path: PathBuf,
}

impl ArtifactFile {
    /// Exclusively create a fresh artifact for `safe_name` in `dir`.
    ///
    /// The numeric suffix starts at the current time in milliseconds and is
    /// bumped on collision, so concurrent requests for the same image never
    /// share a path.
    pub async fn create(dir: &Path, safe_name: &str) -> std::io::Result<(Self, File)> {
        let mut stamp = chrono::Utc::now().timestamp_millis();

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let filename = format!("{}_{}.{}", safe_name, stamp, ARTIFACT_EXTENSION);
            let path = dir.join(&filename);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    let lock_path = lock_path_for(&path);
                    tokio::fs::write(&lock_path, b"").await?;
                    tracing::debug!(path = %path.display(), "Created artifact");
                    return Ok((
                        Self {
                            path,
                            filename,
                            lock_path,
                        },
                        file,
                    ));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    stamp += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free artifact name for {} in {}", safe_name, dir.display()),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Drop for ArtifactFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    lock = %self.lock_path.display(),
                    error = %e,
                    "Failed to remove artifact lock"
                );
            }
        }
    }
}

/// Lock file path for an artifact path.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(LOCK_SUFFIX);
    PathBuf::from(p)
}

/// Whether a file name is an artifact lock.
pub fn is_lock_file(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX)
}

/// Format a byte count as megabytes with two decimals, e.g. `"12.34 MB"`.
pub fn format_size_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Command that loads an artifact into a Docker daemon.
pub fn load_command(filename: &str) -> String {
    format!("docker load -i {}", filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_names_and_locks() {
        let dir = TempDir::new().unwrap();
        let (artifact, _file) = ArtifactFile::create(dir.path(), "nginx_latest").await.unwrap();

        let name = artifact.filename().to_string();
        let digits = name
            .strip_prefix("nginx_latest_")
            .and_then(|rest| rest.strip_suffix(".tar"))
            .unwrap();
        assert!(!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(artifact.path(), dir.path().join(&name));
        assert!(artifact.path().exists());

        let lock = lock_path_for(artifact.path());
        assert!(lock.exists());
        drop(artifact);
        assert!(!lock.exists());
        assert!(dir.path().join(&name).exists());
    }

    #[tokio::test]
    async fn test_create_never_reuses_a_name() {
        let dir = TempDir::new().unwrap();
        let mut names = std::collections::HashSet::new();
        let mut held = Vec::new();
        for _ in 0..10 {
            let (artifact, file) = ArtifactFile::create(dir.path(), "redis_7").await.unwrap();
            assert!(names.insert(artifact.filename().to_string()));
            held.push((artifact, file));
        }
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(ArtifactFile::create(&missing, "x_latest").await.is_err());
    }

    #[test]
    fn test_lock_helpers() {
        let lock = lock_path_for(Path::new("/out/a_latest_1.tar"));
        assert_eq!(lock, PathBuf::from("/out/a_latest_1.tar.lock"));
        assert!(is_lock_file("a_latest_1.tar.lock"));
        assert!(!is_lock_file("a_latest_1.tar"));
    }

    #[test]
    fn test_format_size_mb() {
        assert_eq!(format_size_mb(0), "0.00 MB");
        assert_eq!(format_size_mb(1024 * 1024), "1.00 MB");
        assert_eq!(format_size_mb(1536 * 1024), "1.50 MB");
        assert_eq!(format_size_mb(12_939_428), "12.34 MB");
    }

    #[test]
    fn test_load_command() {
        assert_eq!(
            load_command("nginx_latest_1.tar"),
            "docker load -i nginx_latest_1.tar"
        );
    }
}
