//! `package.json` reading

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::tool::ToolSpec;
use crate::{Error, Result};

/// Manifest file name
pub const PACKAGE_JSON: &str = "package.json";

/// Lock files that pin the dependency tree, in any package manager
pub const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "pnpm-lock.yaml",
    "yarn.lock",
];

/// The parts of `package.json` nodekit cares about
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    /// Corepack-style `name@version` declaration
    #[serde(default)]
    pub package_manager: Option<String>,
    /// Declared scripts
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl PackageJson {
    /// Path of the manifest inside a project directory
    #[must_use]
    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(PACKAGE_JSON)
    }

    /// Read the manifest from a project directory.
    ///
    /// Returns `Ok(None)` when the project has no `package.json`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn read(project_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(project_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        let manifest = serde_json::from_str(&content).map_err(|e| {
            Error::configuration(format!("{} is not valid JSON: {e}", path.display()))
        })?;
        Ok(Some(manifest))
    }

    /// Package manager declared through the `packageManager` field
    ///
    /// # Errors
    ///
    /// Returns a validation error when the declaration is malformed.
    pub fn declared_package_manager(&self) -> Result<Option<ToolSpec>> {
        self.package_manager
            .as_deref()
            .map(ToolSpec::parse_package_manager)
            .transpose()
    }
}
