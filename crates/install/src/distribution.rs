//! Distribution URL construction.
//!
//! Mapping a [`ToolSpec`] and a [`Platform`] to a download URL is a pure
//! function: no network access, no filesystem access. Combinations for which no
//! archive is published fail instead of guessing a neighbouring platform.

use nodekit_core::config::{
    Config, DEFAULT_NODE_MUSL_URL_ROOT, DEFAULT_NODE_URL_PATH_PATTERN, DEFAULT_NODE_URL_ROOT,
    DEFAULT_REGISTRY_URL, DEFAULT_YARN_URL_ROOT,
};
use nodekit_core::{Arch, Error, Os, PackageManagerKind, Platform, Result, Tool, ToolSpec};
use std::path::PathBuf;

/// Archive container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// File extension, without the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }

    /// Detect the format from a file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// How the installed executable is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    /// A native binary.
    Native,
    /// A JavaScript entry point run by the Node.js runtime.
    NodeScript,
}

/// Where distributions are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSettings {
    pub node_url_root: String,
    /// `VERSION`, `ARCH` and `TYPE` are substituted.
    pub node_url_path_pattern: String,
    pub node_musl_url_root: String,
    pub registry_url: String,
    pub yarn_url_root: String,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            node_url_root: DEFAULT_NODE_URL_ROOT.to_string(),
            node_url_path_pattern: DEFAULT_NODE_URL_PATH_PATTERN.to_string(),
            node_musl_url_root: DEFAULT_NODE_MUSL_URL_ROOT.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            yarn_url_root: DEFAULT_YARN_URL_ROOT.to_string(),
        }
    }
}

impl From<&Config> for DistributionSettings {
    fn from(config: &Config) -> Self {
        Self {
            node_url_root: config.node.distribution_url_root.clone(),
            node_url_path_pattern: config.node.distribution_url_path_pattern.clone(),
            node_musl_url_root: config.node.musl_distribution_url_root.clone(),
            registry_url: config.package_manager.registry_url.clone(),
            yarn_url_root: config.package_manager.yarn_url_root.clone(),
        }
    }
}

/// Everything needed to fetch and lay out one distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionDescriptor {
    pub spec: ToolSpec,
    pub platform: Platform,
    pub url: String,
    /// Last path segment of `url`.
    pub file_name: String,
    pub archive_format: ArchiveFormat,
    /// Single top-level directory every entry lives under.
    pub root_entry: Option<String>,
    /// `SHASUMS256.txt` listing the archive, when the mirror publishes one.
    pub checksum_url: Option<String>,
    /// Executable relative to the installation directory.
    pub executable: PathBuf,
    /// Directory prepended to `PATH`, relative to the installation directory.
    pub bin_dir: PathBuf,
    pub launcher: Launcher,
}

/// Builds [`DistributionDescriptor`]s from settings.
#[derive(Debug, Clone, Default)]
pub struct DistributionUrlBuilder {
    settings: DistributionSettings,
}

fn join_url(root: &str, path: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Replace every placeholder in `pattern` in a single left-to-right pass, so
/// substituted values are never expanded again.
fn expand_pattern(pattern: &str, placeholders: &[(&str, &str)]) -> String {
    let mut expanded = String::with_capacity(pattern.len());
    let mut rest = pattern;
    'scan: while let Some(c) = rest.chars().next() {
        for (name, value) in placeholders {
            if let Some(after) = rest.strip_prefix(name) {
                expanded.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        expanded.push(c);
        rest = &rest[c.len_utf8()..];
    }
    expanded
}

fn file_name_of(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

impl DistributionUrlBuilder {
    #[must_use]
    pub fn new(settings: DistributionSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &DistributionSettings {
        &self.settings
    }

    /// Resolve the distribution of `spec` for `platform`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed versions and
    /// `UnresolvableDistribution` for combinations nothing is published for.
    pub fn build(&self, spec: &ToolSpec, platform: &Platform) -> Result<DistributionDescriptor> {
        let version = spec.semver()?;
        match spec.tool {
            Tool::Node => self.node(spec, platform),
            Tool::PackageManager(kind) => self.package_manager(spec, kind, &version, platform),
        }
    }

    fn node(&self, spec: &ToolSpec, platform: &Platform) -> Result<DistributionDescriptor> {
        let unresolvable = |reason: &str| Error::UnresolvableDistribution {
            tool: spec.tool.to_string(),
            version: spec.version.clone(),
            platform: platform.to_string(),
            reason: reason.to_string(),
        };

        let supported = match platform.os {
            Os::Linux if platform.is_musl() => matches!(platform.arch, Arch::X64),
            Os::Linux => matches!(
                platform.arch,
                Arch::X64 | Arch::Arm64 | Arch::Armv7l | Arch::Ppc64le | Arch::S390x
            ),
            Os::Darwin => matches!(platform.arch, Arch::X64 | Arch::Arm64),
            Os::Windows => matches!(platform.arch, Arch::X64 | Arch::X86 | Arch::Arm64),
        };
        if !supported {
            return Err(unresolvable(
                "Node.js does not publish binaries for this platform",
            ));
        }

        let format = if platform.is_windows() {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        };
        let root = if platform.is_musl() {
            &self.settings.node_musl_url_root
        } else {
            &self.settings.node_url_root
        };
        let arch = platform.to_string();
        let path = expand_pattern(
            &self.settings.node_url_path_pattern,
            &[
                ("VERSION", spec.version.as_str()),
                ("ARCH", arch.as_str()),
                ("TYPE", format.extension()),
            ],
        );
        let url = join_url(root, &path);
        let file_name = file_name_of(&url).to_string();
        let root_entry = file_name
            .strip_suffix(&format!(".{}", format.extension()))
            .map(str::to_string);
        let checksum_url = url
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/SHASUMS256.txt"));

        let (executable, bin_dir) = if platform.is_windows() {
            (PathBuf::from("node.exe"), PathBuf::new())
        } else {
            (PathBuf::from("bin/node"), PathBuf::from("bin"))
        };

        Ok(DistributionDescriptor {
            spec: spec.clone(),
            platform: *platform,
            url,
            file_name,
            archive_format: format,
            root_entry,
            checksum_url,
            executable,
            bin_dir,
            launcher: Launcher::Native,
        })
    }

    fn package_manager(
        &self,
        spec: &ToolSpec,
        kind: PackageManagerKind,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<DistributionDescriptor> {
        let unresolvable = |reason: &str| Error::UnresolvableDistribution {
            tool: spec.tool.to_string(),
            version: spec.version.clone(),
            platform: platform.to_string(),
            reason: reason.to_string(),
        };

        let (url, root_entry, executable) = match kind {
            PackageManagerKind::Npm => (
                join_url(
                    &self.settings.registry_url,
                    &format!("npm/-/npm-{}.tgz", spec.version),
                ),
                "package".to_string(),
                "bin/npm-cli.js",
            ),
            PackageManagerKind::Pnpm => {
                if version.major < 7 {
                    return Err(unresolvable("pnpm releases before 7.0.0 are not supported"));
                }
                (
                    join_url(
                        &self.settings.registry_url,
                        &format!("pnpm/-/pnpm-{}.tgz", spec.version),
                    ),
                    "package".to_string(),
                    "bin/pnpm.cjs",
                )
            }
            PackageManagerKind::Yarn => {
                if version.major != 1 {
                    return Err(unresolvable(
                        "only Yarn 1.x ships as a release archive; newer versions are installed through Corepack",
                    ));
                }
                (
                    join_url(
                        &self.settings.yarn_url_root,
                        &format!("v{0}/yarn-v{0}.tar.gz", spec.version),
                    ),
                    format!("yarn-v{}", spec.version),
                    "bin/yarn.js",
                )
            }
        };
        let file_name = file_name_of(&url).to_string();

        Ok(DistributionDescriptor {
            spec: spec.clone(),
            platform: *platform,
            url,
            file_name,
            archive_format: ArchiveFormat::TarGz,
            root_entry: Some(root_entry),
            checksum_url: None,
            executable: PathBuf::from(executable),
            bin_dir: PathBuf::from("bin"),
            launcher: Launcher::NodeScript,
        })
    }
}
