//! Centralized path management for nodekit data directories.
//!
//! | Data | Default location |
//! |------|------------------|
//! | Installed toolchains | `<cache>/<tool>/<platform>/<version>/` |
//! | Lock files | `<cache>/.locks/` |
//! | In-flight downloads | `<cache>/.downloads/` |
//! | Fingerprints and markers | `<cache>/state/` |
//!
//! Environment variable overrides for testing and CI:
//! - `NODEKIT_CACHE_DIR` - Override the cache root
//! - `NODEKIT_STATE_DIR` - Override the state directory

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "NODEKIT_CACHE_DIR";

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "NODEKIT_STATE_DIR";

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) NODEKIT_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/nodekit
    // 3) OS cache dir/nodekit
    // 4) ~/.nodekit/cache
    // 5) TMPDIR/nodekit/cache
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("nodekit"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("nodekit"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".nodekit/cache"));
    }
    candidates.push(inputs.temp_dir.join("nodekit/cache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if is_writable_dir(&path) {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Existing directories are probed for writability; some CI environments
/// provide read-only cache directories under `$HOME`.
fn is_writable_dir(path: &Path) -> bool {
    if path.exists() {
        let probe = path.join(".write_probe");
        let writable = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&probe)
            .is_ok();
        if writable {
            let _ = std::fs::remove_file(&probe);
        }
        return writable;
    }
    std::fs::create_dir_all(path).is_ok()
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Get the cache root for installed toolchains.
///
/// # Errors
///
/// Returns an error if no candidate directory is writable.
pub fn cache_dir() -> Result<PathBuf> {
    let inputs = CacheInputs {
        override_dir: non_empty_env(CACHE_DIR_ENV),
        xdg_cache_home: non_empty_env("XDG_CACHE_HOME"),
        os_cache_dir: dirs::cache_dir(),
        home_dir: dirs::home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}

/// Get the state directory holding fingerprints and script markers.
///
/// Resolution order:
/// 1. `NODEKIT_STATE_DIR` environment variable
/// 2. `<cache_root>/state`
#[must_use]
pub fn state_dir(cache_root: &Path) -> PathBuf {
    non_empty_env(STATE_DIR_ENV).unwrap_or_else(|| cache_root.join("state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_root_skips_homeless_shelter() {
        let tmp = tempfile::tempdir().unwrap();
        let inputs = CacheInputs {
            override_dir: None,
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            os_cache_dir: None,
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir =
            cache_root_from_inputs(inputs).expect("cache_root should choose a writable fallback");
        assert!(!dir.starts_with("/homeless-shelter"));
        assert_eq!(dir, tmp.path().join("nodekit/cache"));
    }

    #[test]
    fn cache_root_prefers_override() {
        let tmp = tempfile::tempdir().unwrap();
        let override_dir = tmp.path().join("override");
        let inputs = CacheInputs {
            override_dir: Some(override_dir.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = cache_root_from_inputs(inputs).unwrap();
        assert_eq!(dir, override_dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn cache_root_uses_xdg_before_os_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let inputs = CacheInputs {
            override_dir: Some(PathBuf::new()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: Some(tmp.path().join("os")),
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(
            cache_root_from_inputs(inputs).unwrap(),
            tmp.path().join("xdg/nodekit")
        );
    }

    #[test]
    fn cache_dir_respects_env() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("env-cache");
        temp_env::with_var(CACHE_DIR_ENV, Some(&dir), || {
            assert_eq!(cache_dir().unwrap(), dir);
        });
    }

    #[test]
    fn state_dir_defaults_under_cache_root() {
        temp_env::with_var_unset(STATE_DIR_ENV, || {
            assert_eq!(
                state_dir(Path::new("/cache/nodekit")),
                PathBuf::from("/cache/nodekit/state")
            );
        });
        temp_env::with_var(STATE_DIR_ENV, Some("/var/nodekit-state"), || {
            assert_eq!(
                state_dir(Path::new("/cache/nodekit")),
                PathBuf::from("/var/nodekit-state")
            );
        });
    }
}
