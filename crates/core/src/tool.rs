//! Tool identities and version specs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Package managers that can be provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManagerKind {
    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "npm" => Some(Self::Npm),
            "pnpm" => Some(Self::Pnpm),
            "yarn" => Some(Self::Yarn),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tool that has a downloadable distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// The Node.js runtime.
    Node,
    /// A JavaScript package manager.
    PackageManager(PackageManagerKind),
}

impl Tool {
    /// Name used in cache paths and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::PackageManager(kind) => kind.name(),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A requested tool version.
///
/// The version string is kept exactly as supplied; pre-release and build
/// metadata end up in URLs and cache paths unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool: Tool,
    pub version: String,
}

impl ToolSpec {
    #[must_use]
    pub fn new(tool: Tool, version: impl Into<String>) -> Self {
        Self {
            tool,
            version: version.into(),
        }
    }

    /// Node.js at the given version.
    #[must_use]
    pub fn node(version: impl Into<String>) -> Self {
        Self::new(Tool::Node, version)
    }

    /// A package manager at the given version.
    #[must_use]
    pub fn package_manager(kind: PackageManagerKind, version: impl Into<String>) -> Self {
        Self::new(Tool::PackageManager(kind), version)
    }

    /// Parse a `name@version` declaration such as `pnpm@8.6.0`.
    ///
    /// A trailing Corepack integrity hash (`+sha512.<hex>`) is dropped: it
    /// pins the tarball, not the version.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown package managers or invalid
    /// versions.
    pub fn parse_package_manager(declaration: &str) -> Result<Self> {
        let (name, version) = declaration.trim().split_once('@').ok_or_else(|| {
            Error::validation(format!(
                "package manager '{declaration}' must be written as <name>@<version>"
            ))
        })?;
        let kind = PackageManagerKind::parse(name).ok_or_else(|| {
            Error::validation(format!(
                "unsupported package manager '{name}' (expected npm, pnpm or yarn)"
            ))
        })?;
        let version = match version.split_once("+sha") {
            Some((bare, _)) => bare,
            None => version,
        };
        let spec = Self::package_manager(kind, version);
        spec.semver()?;
        Ok(spec)
    }

    /// Validate the version string as a semantic version.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the tool and the offending string.
    pub fn semver(&self) -> Result<semver::Version> {
        semver::Version::parse(&self.version).map_err(|e| {
            Error::validation(format!(
                "invalid {} version '{}': {e}",
                self.tool, self.version
            ))
        })
    }
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tool, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names() {
        assert_eq!(Tool::Node.name(), "node");
        assert_eq!(Tool::PackageManager(PackageManagerKind::Pnpm).name(), "pnpm");
        assert_eq!(ToolSpec::node("18.17.1").to_string(), "node@18.17.1");
    }

    #[test]
    fn test_semver_validation() {
        assert!(ToolSpec::node("16.14.0").semver().is_ok());
        assert!(ToolSpec::node("20.0.0-rc.1+build.5").semver().is_ok());

        let err = ToolSpec::node("v16.14.0").semver().unwrap_err();
        assert!(err.to_string().contains("invalid node version 'v16.14.0'"));
        assert!(ToolSpec::node("16").semver().is_err());
        assert!(ToolSpec::node("").semver().is_err());
    }

    #[test]
    fn test_parse_package_manager() {
        let spec = ToolSpec::parse_package_manager("pnpm@8.6.0").unwrap();
        assert_eq!(spec.tool, Tool::PackageManager(PackageManagerKind::Pnpm));
        assert_eq!(spec.version, "8.6.0");

        let spec = ToolSpec::parse_package_manager("npm@9.6.7").unwrap();
        assert_eq!(spec.tool, Tool::PackageManager(PackageManagerKind::Npm));
    }

    #[test]
    fn test_parse_package_manager_strips_integrity() {
        let spec = ToolSpec::parse_package_manager("yarn@1.22.19+sha1.4ba7fc5c6e704fce2066ecbfb0b0d8976fe62447")
            .unwrap();
        assert_eq!(spec.version, "1.22.19");
    }

    #[test]
    fn test_parse_package_manager_errors() {
        assert!(ToolSpec::parse_package_manager("pnpm").is_err());
        assert!(ToolSpec::parse_package_manager("bun@1.0.0").is_err());
        assert!(ToolSpec::parse_package_manager("npm@latest").is_err());
    }
}
