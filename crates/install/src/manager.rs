//! Idempotent installation of distributions into the shared cache

use crate::cache::{CacheKey, InstallCache, InstallReceipt};
use crate::distribution::{
    DistributionDescriptor, DistributionSettings, DistributionUrlBuilder, Launcher,
};
use crate::download::{Fetcher, HttpDownloader, parse_shasums};
use crate::extract::extract_archive;
use chrono::Utc;
use nodekit_core::{
    Config, Error, FixedPlatformResolver, HostPlatformResolver, Platform, PlatformResolver,
    Result, ToolSpec,
};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Progress of one installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Unresolved,
    Downloading,
    Extracting,
    Verifying,
    Installed,
    Failed,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unresolved => "unresolved",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Verifying => "verifying",
            Self::Installed => "installed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A usable installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub spec: ToolSpec,
    pub platform: Platform,
    pub install_dir: PathBuf,
    /// Absolute path of the executable or entry script
    pub executable: PathBuf,
    /// Absolute directory to put on `PATH`
    pub bin_dir: PathBuf,
    pub launcher: Launcher,
    /// Whether this call downloaded it
    pub freshly_installed: bool,
}

impl Installation {
    fn new(descriptor: &DistributionDescriptor, install_dir: PathBuf, fresh: bool) -> Self {
        Self {
            spec: descriptor.spec.clone(),
            platform: descriptor.platform,
            executable: install_dir.join(&descriptor.executable),
            bin_dir: install_dir.join(&descriptor.bin_dir),
            install_dir,
            launcher: descriptor.launcher,
            freshly_installed: fresh,
        }
    }
}

/// Owns the cache directory and every mutation of it
pub struct InstallationManager {
    cache: InstallCache,
    resolver: Arc<dyn PlatformResolver>,
    urls: DistributionUrlBuilder,
    fetcher: Arc<dyn Fetcher>,
    verify_checksums: bool,
    platform: OnceLock<Platform>,
}

impl fmt::Debug for InstallationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationManager")
            .field("cache", &self.cache)
            .field("urls", &self.urls)
            .field("verify_checksums", &self.verify_checksums)
            .field("platform", &self.platform.get())
            .finish_non_exhaustive()
    }
}

fn transition(spec: &ToolSpec, state: InstallState) {
    info!(tool = %spec.tool, version = %spec.version, %state, "Installation state");
}

fn verification_error(descriptor: &DistributionDescriptor, dir: &Path, message: String) -> Error {
    Error::InstallationVerification {
        tool: descriptor.spec.tool.to_string(),
        version: descriptor.spec.version.clone(),
        path: dir.into(),
        message,
    }
}

/// Check that the executable of `descriptor` exists below `dir` and can be run.
fn verify(descriptor: &DistributionDescriptor, dir: &Path) -> Result<()> {
    let executable = dir.join(&descriptor.executable);
    let metadata = fs::metadata(&executable).map_err(|_| {
        verification_error(
            descriptor,
            dir,
            format!("{} is missing", descriptor.executable.display()),
        )
    })?;
    if !metadata.is_file() {
        return Err(verification_error(
            descriptor,
            dir,
            format!("{} is not a file", descriptor.executable.display()),
        ));
    }

    #[cfg(unix)]
    if descriptor.launcher == Launcher::Native && !descriptor.platform.is_windows() {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(verification_error(
                descriptor,
                dir,
                format!("{} is not executable", descriptor.executable.display()),
            ));
        }
    }
    Ok(())
}

impl InstallationManager {
    #[must_use]
    pub fn new(
        cache: InstallCache,
        resolver: Arc<dyn PlatformResolver>,
        urls: DistributionUrlBuilder,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            cache,
            resolver,
            urls,
            fetcher,
            verify_checksums: true,
            platform: OnceLock::new(),
        }
    }

    /// Whether archives are checked against published `SHASUMS256.txt` files
    #[must_use]
    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Build a manager from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when no cache directory is usable or the HTTP client
    /// cannot be configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = InstallCache::new(config.cache_root()?, config.cache.lock_timeout());
        let resolver: Arc<dyn PlatformResolver> = match config.platform {
            Some(platform) => Arc::new(FixedPlatformResolver(platform)),
            None => Arc::new(HostPlatformResolver),
        };
        let urls = DistributionUrlBuilder::new(DistributionSettings::from(config));
        let fetcher = Arc::new(HttpDownloader::from_config(
            &config.http,
            [
                config.node.distribution_url_root.as_str(),
                config.node.musl_distribution_url_root.as_str(),
            ],
        )?);
        Ok(Self::new(cache, resolver, urls, fetcher)
            .with_checksum_verification(config.verify_checksums))
    }

    #[must_use]
    pub fn cache(&self) -> &InstallCache {
        &self.cache
    }

    /// Platform installations are made for, resolved once.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` when the host cannot be mapped.
    pub fn platform(&self) -> Result<Platform> {
        if let Some(platform) = self.platform.get() {
            return Ok(*platform);
        }
        let platform = self.resolver.resolve()?;
        Ok(*self.platform.get_or_init(|| platform))
    }

    /// Distribution of `spec` for the resolved platform.
    ///
    /// # Errors
    ///
    /// See [`DistributionUrlBuilder::build`].
    pub fn descriptor(&self, spec: &ToolSpec) -> Result<DistributionDescriptor> {
        spec.semver()?;
        self.urls.build(spec, &self.platform()?)
    }

    /// The installation of `spec` if it is complete, without any network I/O.
    ///
    /// # Errors
    ///
    /// Returns an error when the spec cannot be resolved.
    pub fn locate(&self, spec: &ToolSpec) -> Result<Option<Installation>> {
        let descriptor = self.descriptor(spec)?;
        let key = CacheKey::new(spec, descriptor.platform);
        Ok(self
            .is_usable(&key, &descriptor)
            .then(|| Installation::new(&descriptor, self.cache.entry_dir(&key), false)))
    }

    /// Use a distribution that was installed outside the cache.
    ///
    /// # Errors
    ///
    /// Returns `InstallationVerification` when `dir` does not contain the
    /// expected executable.
    pub fn provided(&self, spec: &ToolSpec, dir: &Path) -> Result<Installation> {
        let descriptor = self.descriptor(spec)?;
        verify(&descriptor, dir)?;
        debug!(tool = %spec.tool, dir = %dir.display(), "Using provided distribution");
        Ok(Installation::new(&descriptor, dir.to_path_buf(), false))
    }

    fn is_usable(&self, key: &CacheKey, descriptor: &DistributionDescriptor) -> bool {
        self.cache.is_complete(key)
            && self
                .cache
                .entry_dir(key)
                .join(&descriptor.executable)
                .exists()
    }

    /// Make sure `spec` is installed and return its installation.
    ///
    /// Safe to call concurrently from several tasks or processes: only one of
    /// them downloads, the others wait for the per-key lock and reuse the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns resolution, download, archive, verification or lock errors. A
    /// failed installation leaves no directory behind.
    pub async fn ensure_installed(&self, spec: &ToolSpec) -> Result<Installation> {
        transition(spec, InstallState::Unresolved);
        let descriptor = self.descriptor(spec)?;
        let key = CacheKey::new(spec, descriptor.platform);
        let entry = self.cache.entry_dir(&key);

        if self.is_usable(&key, &descriptor) {
            debug!(%key, dir = %entry.display(), "Already installed");
            return Ok(Installation::new(&descriptor, entry, false));
        }

        let _lock = self.cache.lock(&key).await?;
        if self.is_usable(&key, &descriptor) {
            debug!(%key, "Installed by another process while waiting for the lock");
            return Ok(Installation::new(&descriptor, entry, false));
        }

        if entry.exists() {
            warn!(%key, dir = %entry.display(), "Removing incomplete installation");
            fs::remove_dir_all(&entry).map_err(|e| Error::io(e, &entry, "remove_dir_all"))?;
        }

        match self.install(&key, &descriptor).await {
            Ok(()) => {
                transition(spec, InstallState::Installed);
                Ok(Installation::new(&descriptor, entry, true))
            }
            Err(e) => {
                transition(spec, InstallState::Failed);
                Err(e)
            }
        }
    }

    async fn expected_checksum(&self, descriptor: &DistributionDescriptor) -> Result<Option<String>> {
        let Some(url) = descriptor.checksum_url.as_deref().filter(|_| self.verify_checksums) else {
            return Ok(None);
        };
        let listing = self.fetcher.fetch_text(url).await?;
        parse_shasums(&listing, &descriptor.file_name)
            .map(Some)
            .ok_or_else(|| Error::UnresolvableDistribution {
                tool: descriptor.spec.tool.to_string(),
                version: descriptor.spec.version.clone(),
                platform: descriptor.platform.to_string(),
                reason: format!("{url} does not list {}", descriptor.file_name),
            })
    }

    async fn install(&self, key: &CacheKey, descriptor: &DistributionDescriptor) -> Result<()> {
        let spec = &descriptor.spec;
        transition(spec, InstallState::Downloading);
        let sha256 = self.expected_checksum(descriptor).await?;
        let archive = self.cache.downloads_dir().join(format!(
            "{key}.{}",
            descriptor.archive_format.extension()
        ));
        self.fetcher
            .fetch(&descriptor.url, &archive, sha256.as_deref())
            .await?;

        let staging = self.cache.staging_dir(key);
        let unpacked = self.unpack(descriptor, &archive, &staging).await;
        if let Err(e) = fs::remove_file(&archive) {
            debug!(archive = %archive.display(), "Could not remove archive: {e}");
        }
        if let Err(e) = unpacked {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let entry = self.cache.entry_dir(key);
        if let Err(e) = fs::rename(&staging, &entry) {
            let _ = fs::remove_dir_all(&staging);
            return Err(Error::io(e, &entry, "rename"));
        }
        let receipt = InstallReceipt {
            tool: spec.tool,
            version: spec.version.clone(),
            platform: descriptor.platform,
            url: descriptor.url.clone(),
            sha256,
            installed_at: Utc::now(),
        };
        if let Err(e) = self.cache.write_marker(key, &receipt) {
            let _ = fs::remove_dir_all(&entry);
            return Err(e);
        }
        Ok(())
    }

    async fn unpack(
        &self,
        descriptor: &DistributionDescriptor,
        archive: &Path,
        staging: &Path,
    ) -> Result<()> {
        transition(&descriptor.spec, InstallState::Extracting);
        let format = descriptor.archive_format;
        let root_entry = descriptor.root_entry.clone();
        let (archive, target) = (archive.to_path_buf(), staging.to_path_buf());
        tokio::task::spawn_blocking(move || {
            extract_archive(&archive, format, &target, root_entry.as_deref())
        })
        .await
        .map_err(|e| Error::io_no_path(std::io::Error::other(e), "extract"))??;

        transition(&descriptor.spec, InstallState::Verifying);
        verify(descriptor, staging)
    }
}
