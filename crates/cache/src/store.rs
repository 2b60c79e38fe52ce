//! Latest fingerprint per (project, unit)

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "fingerprints.json";
const LOCK_FILE: &str = "fingerprints.lock";
const MARKERS_DIR: &str = "markers";

/// A recorded fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Fingerprint of the unit's inputs at the last successful run
    pub fingerprint: String,
    /// When the run finished
    pub recorded_at: DateTime<Utc>,
}

/// Index mapping unit names to their latest fingerprints (per project)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintIndex {
    /// Map of (project_root_hash, unit_name) -> record
    pub entries: BTreeMap<String, BTreeMap<String, FingerprintRecord>>,
}

/// Fingerprint index and output markers below a state directory
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    root: PathBuf,
}

fn project_hash(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// Unit names may contain characters that are not valid in file names. A
/// short hash of the raw name keeps names that sanitise alike apart.
fn marker_file_name(unit: &str) -> String {
    let safe: String = unit
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = Sha256::digest(unit.as_bytes());
    format!("{safe}-{}.done", hex::encode(&digest[..4]))
}

impl FingerprintStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn read_index(&self) -> FingerprintIndex {
        let path = self.index_path();
        let Ok(content) = fs::read_to_string(&path) else {
            return FingerprintIndex::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "Ignoring unreadable fingerprint index: {e}");
            FingerprintIndex::default()
        })
    }

    /// Read-modify-write of the index under an exclusive lock, replaced atomically.
    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut FingerprintIndex),
    {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))?;
        let lock_path = self.root.join(LOCK_FILE);
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::io(e, &lock_path, "open"))?;
        lock.lock_exclusive()
            .map_err(|e| Error::io(e, &lock_path, "lock"))?;

        let mut index = self.read_index();
        apply(&mut index);

        let json = serde_json::to_string_pretty(&index)
            .map_err(|e| Error::serialization(format!("Failed to serialize fingerprint index: {e}")))?;
        let path = self.index_path();
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(|e| Error::io(e, &temp_path, "write"))?;
        fs::rename(&temp_path, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        // Unlock happens automatically when the lock file is dropped
        Ok(())
    }

    /// Look up the latest fingerprint of a unit in a project
    #[must_use]
    pub fn lookup(&self, project_root: &Path, unit: &str) -> Option<FingerprintRecord> {
        self.read_index()
            .entries
            .get(&project_hash(project_root))?
            .get(unit)
            .cloned()
    }

    /// Record the fingerprint of a successful run
    pub fn record(&self, project_root: &Path, unit: &str, fingerprint: &str) -> Result<()> {
        let record = FingerprintRecord {
            fingerprint: fingerprint.to_string(),
            recorded_at: Utc::now(),
        };
        self.update(|index| {
            index
                .entries
                .entry(project_hash(project_root))
                .or_default()
                .insert(unit.to_string(), record);
        })?;
        tracing::debug!(unit, fingerprint, "Recorded fingerprint");
        Ok(())
    }

    /// Drop the record of a unit so that it runs again
    pub fn forget(&self, project_root: &Path, unit: &str) -> Result<()> {
        self.update(|index| {
            let key = project_hash(project_root);
            if let Some(units) = index.entries.get_mut(&key) {
                units.remove(unit);
                if units.is_empty() {
                    index.entries.remove(&key);
                }
            }
        })
    }

    /// All recorded units of a project
    #[must_use]
    pub fn project_entries(&self, project_root: &Path) -> BTreeMap<String, FingerprintRecord> {
        self.read_index()
            .entries
            .remove(&project_hash(project_root))
            .unwrap_or_default()
    }

    /// Marker file standing for the output of a unit that produces no files
    #[must_use]
    pub fn marker_path(&self, project_root: &Path, unit: &str) -> PathBuf {
        self.root
            .join(MARKERS_DIR)
            .join(project_hash(project_root))
            .join(marker_file_name(unit))
    }

    /// Create or refresh the marker file of a unit
    pub fn touch_marker(&self, project_root: &Path, unit: &str) -> Result<PathBuf> {
        let path = self.marker_path(project_root, unit);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        fs::write(&path, Utc::now().to_rfc3339()).map_err(|e| Error::io(e, &path, "write"))?;
        Ok(path)
    }
}
