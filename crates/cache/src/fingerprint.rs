//! Deterministic input fingerprints

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Everything that decides whether a unit's previous output is still valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEnvelope {
    /// Unit name
    pub unit: String,
    /// Named inputs: versions, settings and content hashes
    pub inputs: BTreeMap<String, String>,
    /// Platform identifier
    pub platform: String,
    /// Version of nodekit that computed the fingerprint
    pub nodekit_version: String,
}

impl FingerprintEnvelope {
    /// Create an envelope without inputs
    #[must_use]
    pub fn new(unit: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            inputs: BTreeMap::new(),
            platform: platform.into(),
            nodekit_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Add a named input
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Add several inputs at once
    #[must_use]
    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs.extend(inputs);
        self
    }
}

/// Compute a deterministic fingerprint from the envelope
pub fn compute_fingerprint(envelope: &FingerprintEnvelope) -> Result<String> {
    // Canonical JSON with sorted keys (BTreeMap ensures deterministic ordering for maps)
    let bytes = serde_json::to_vec(envelope)
        .map_err(|e| Error::serialization(format!("Failed to serialize envelope: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// SHA-256 of a file's content
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a file, or `None` when it does not exist
pub fn hash_optional_file(path: &Path) -> Result<Option<String>> {
    if path.is_file() {
        hash_file(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Hash a file, or every file below a directory.
///
/// Directory hashes cover relative paths as well as content, so renames
/// change the result.
pub fn hash_path(path: &Path) -> Result<String> {
    if path.is_file() {
        return hash_file(path);
    }
    if !path.is_dir() {
        return Err(Error::MissingInput { path: path.into() });
    }
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let p = e.path().map_or_else(|| path.to_path_buf(), Path::to_path_buf);
            Error::io(e.into(), p, "walk")
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        hasher.update(hash_file(entry.path())?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash declared inputs relative to `base`, keyed as `input:<path>`
pub fn hash_inputs(base: &Path, inputs: &[PathBuf]) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for input in inputs {
        let absolute = base.join(input);
        let key = format!("input:{}", input.to_string_lossy().replace('\\', "/"));
        hashes.insert(key, hash_path(&absolute)?);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn baseline_envelope() -> FingerprintEnvelope {
        FingerprintEnvelope::new("install-dependencies", "linux-x64")
            .with_input("node", "16.14.0")
            .with_input("file:package.json", "abc123")
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_invariant() {
        let a = FingerprintEnvelope::new("u", "linux-x64")
            .with_input("b", "2")
            .with_input("a", "1");
        let b = FingerprintEnvelope::new("u", "linux-x64")
            .with_input("a", "1")
            .with_input("b", "2");
        assert_eq!(compute_fingerprint(&a).unwrap(), compute_fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_when_input_changes() {
        let base = compute_fingerprint(&baseline_envelope()).unwrap();
        let changed = baseline_envelope().with_input("file:package.json", "def456");
        assert_ne!(base, compute_fingerprint(&changed).unwrap());
    }

    #[test]
    fn fingerprint_changes_when_platform_or_unit_changes() {
        let base = compute_fingerprint(&baseline_envelope()).unwrap();
        let mut other = baseline_envelope();
        other.platform = "darwin-arm64".to_string();
        assert_ne!(base, compute_fingerprint(&other).unwrap());

        let mut other = baseline_envelope();
        other.unit = "run-script:build".to_string();
        assert_ne!(base, compute_fingerprint(&other).unwrap());
    }

    #[test]
    fn fingerprint_changes_when_nodekit_version_changes() {
        let base = compute_fingerprint(&baseline_envelope()).unwrap();
        let mut other = baseline_envelope();
        other.nodekit_version = "0.0.0-other".to_string();
        assert_ne!(base, compute_fingerprint(&other).unwrap());
    }

    #[test]
    fn test_hash_file_known_value() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_hash_optional_file() {
        let tmp = TempDir::new().unwrap();
        assert!(hash_optional_file(&tmp.path().join("yarn.lock")).unwrap().is_none());
    }

    #[test]
    fn test_hash_directory_tracks_content_and_names() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.js"), "a").unwrap();
        fs::write(src.join("nested/b.js"), "b").unwrap();
        let first = hash_path(&src).unwrap();
        assert_eq!(first, hash_path(&src).unwrap());

        fs::write(src.join("nested/b.js"), "b2").unwrap();
        let second = hash_path(&src).unwrap();
        assert_ne!(first, second);

        fs::rename(src.join("a.js"), src.join("c.js")).unwrap();
        assert_ne!(second, hash_path(&src).unwrap());
    }

    #[test]
    fn test_hash_inputs_missing_path() {
        let tmp = TempDir::new().unwrap();
        let err = hash_inputs(tmp.path(), &[PathBuf::from("nope")]).unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }

    #[test]
    fn test_hash_inputs_keys() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("vite.config.ts"), "export default {}").unwrap();
        let hashes = hash_inputs(tmp.path(), &[PathBuf::from("vite.config.ts")]).unwrap();
        assert!(hashes.contains_key("input:vite.config.ts"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fingerprint_ignores_insertion_order(
                entries in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..8)
            ) {
                let forward = entries.iter().fold(
                    FingerprintEnvelope::new("u", "linux-x64"),
                    |env, (k, v)| env.with_input(k.clone(), v.clone()),
                );
                let backward = entries.iter().rev().fold(
                    FingerprintEnvelope::new("u", "linux-x64"),
                    |env, (k, v)| env.with_input(k.clone(), v.clone()),
                );
                prop_assert_eq!(
                    compute_fingerprint(&forward).unwrap(),
                    compute_fingerprint(&backward).unwrap()
                );
            }
        }
    }
}
