//! Shared installation cache
//!
//! Layout below the cache root:
//!
//! ```text
//! <root>/<tool>/<platform>/<version>/            installed distribution
//! <root>/<tool>/<platform>/<version>/.installed  completion marker (receipt)
//! <root>/<tool>/<platform>/.<version>.staging-*  extraction in progress
//! <root>/.downloads/                             archives being fetched
//! <root>/.locks/<key>.lock                       per-installation lock
//! ```
//!
//! A directory without its completion marker is never used; it is the
//! leftover of an interrupted installation.

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use nodekit_core::{Error, Platform, Result, Tool, ToolSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File whose presence marks an installation as complete
pub const COMPLETION_MARKER: &str = ".installed";

const DOWNLOADS_DIR: &str = ".downloads";
const LOCKS_DIR: &str = ".locks";

/// Identity of one cached installation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool: Tool,
    pub platform: Platform,
    pub version: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(spec: &ToolSpec, platform: Platform) -> Self {
        Self {
            tool: spec.tool,
            platform,
            version: spec.version.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.tool, self.platform, self.version)
    }
}

/// Contents of the completion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub tool: Tool,
    pub version: String,
    pub platform: Platform,
    /// URL the archive was downloaded from
    pub url: String,
    /// Digest of the archive, when it was verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub installed_at: DateTime<Utc>,
}

/// Exclusive hold on one cache key, released on drop
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
    path: PathBuf,
}

impl CacheLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The installation cache below a root directory
#[derive(Debug, Clone)]
pub struct InstallCache {
    root: PathBuf,
    lock_timeout: Duration,
}

impl InstallCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final installation directory of a key
    #[must_use]
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.tool.name())
            .join(key.platform.to_string())
            .join(&key.version)
    }

    #[must_use]
    pub fn marker_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(COMPLETION_MARKER)
    }

    /// Fresh, unique directory next to the entry directory to extract into
    #[must_use]
    pub fn staging_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.tool.name())
            .join(key.platform.to_string())
            .join(format!(".{}.staging-{}", key.version, uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    #[must_use]
    pub fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{key}.lock"))
    }

    /// Whether the key is installed and marked complete
    #[must_use]
    pub fn is_complete(&self, key: &CacheKey) -> bool {
        self.marker_path(key).is_file()
    }

    /// Read the receipt of a completed installation.
    ///
    /// # Errors
    ///
    /// Returns an error when the marker exists but cannot be read or parsed.
    pub fn read_receipt(&self, key: &CacheKey) -> Result<Option<InstallReceipt>> {
        let path = self.marker_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        let receipt = serde_json::from_str(&content).map_err(|e| {
            Error::serialization(format!("invalid marker {}: {e}", path.display()))
        })?;
        Ok(Some(receipt))
    }

    /// Write the completion marker. The marker appears atomically.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be written.
    pub fn write_marker(&self, key: &CacheKey, receipt: &InstallReceipt) -> Result<()> {
        let path = self.marker_path(key);
        let json = serde_json::to_string_pretty(receipt)?;
        let temp = path.with_extension("tmp");
        fs::write(&temp, json).map_err(|e| Error::io(e, &temp, "write"))?;
        fs::rename(&temp, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        Ok(())
    }

    /// Take the exclusive lock of a key, waiting at most the configured timeout.
    ///
    /// The lock is a file lock, so it excludes other processes as well as
    /// other tasks of this process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheLockTimeout`] when the lock is not obtained in
    /// time, or an I/O error when the lock file cannot be opened.
    pub async fn lock(&self, key: &CacheKey) -> Result<CacheLock> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(e, &path, "open"))?;

        // A blocking lock on a detached thread: when the wait times out the
        // thread is abandoned and the lock it may still obtain is released
        // as soon as the file is dropped.
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name("nodekit-cache-lock".to_string())
            .spawn(move || {
                let result = file.lock_exclusive().map(|()| file);
                let _ = tx.send(result);
            })
            .map_err(|e| Error::io(e, &path, "spawn lock thread"))?;

        debug!(lock = %path.display(), "Waiting for cache lock");
        match tokio::time::timeout(self.lock_timeout, rx).await {
            Ok(Ok(Ok(file))) => {
                debug!(lock = %path.display(), "Acquired cache lock");
                Ok(CacheLock { _file: file, path })
            }
            Ok(Ok(Err(e))) => Err(Error::io(e, &path, "lock")),
            Ok(Err(_)) => Err(Error::io(
                std::io::Error::other("lock thread terminated"),
                &path,
                "lock",
            )),
            Err(_) => Err(Error::CacheLockTimeout {
                path: path.into_boxed_path(),
                seconds: self.lock_timeout.as_secs(),
            }),
        }
    }
}
