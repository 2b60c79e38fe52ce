//! Archive extraction
//!
//! Entries are validated before anything is written: absolute paths, drive
//! prefixes, `..` components and symbolic links leaving the target directory
//! are rejected with [`Error::UnsafeArchiveEntry`]. Link targets are resolved
//! against the real location of the link, and entries never write through a
//! file or link already present at their destination. A failed extraction
//! removes the target directory, so callers see either a complete tree or
//! nothing.

use crate::distribution::ArchiveFormat;
use flate2::read::GzDecoder;
use nodekit_core::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const FILE_TYPE_MASK: u32 = 0o170_000;
const SYMLINK_TYPE: u32 = 0o120_000;
const PERMISSION_MASK: u32 = 0o777;

/// Extract `archive` into `target`, dropping the leading `strip_prefix`
/// directory from every entry.
///
/// `target` is created if needed and removed again when extraction fails.
///
/// # Errors
///
/// Returns [`Error::UnsafeArchiveEntry`] for entries that would escape
/// `target`, [`Error::Archive`] for unreadable archives or entries outside
/// `strip_prefix`, and I/O errors from writing the tree.
pub fn extract_archive(
    archive: &Path,
    format: ArchiveFormat,
    target: &Path,
    strip_prefix: Option<&str>,
) -> Result<()> {
    fs::create_dir_all(target).map_err(|e| Error::io(e, target, "create_dir_all"))?;
    let root = target
        .canonicalize()
        .map_err(|e| Error::io(e, target, "canonicalize"))?;
    let mut extractor = Extractor {
        archive,
        target,
        root,
        strip_prefix,
        deferred_links: Vec::new(),
        files: 0,
    };
    let result = match format {
        ArchiveFormat::TarGz => extractor.tar_gz(),
        ArchiveFormat::Zip => extractor.zip(),
    }
    .and_then(|()| extractor.finish());

    match result {
        Ok(()) => {
            debug!(
                archive = %archive.display(),
                target = %target.display(),
                files = extractor.files,
                "Extracted archive"
            );
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(target) {
                warn!(target = %target.display(), "Failed to remove partial extraction: {cleanup}");
            }
            Err(e)
        }
    }
}

/// Relative, normalised form of an entry name.
///
/// Returns `None` for names that are absolute, carry a drive prefix or
/// contain `..`.
fn sanitize(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Where a link placed in the canonical directory `parent` ends up pointing.
///
/// `..` is only accepted before the first normal component, so the result
/// never depends on links that later entries create along the way. Returns
/// `None` for absolute targets and for `..` after a normal component.
fn resolve_link(parent: &Path, link_target: &Path) -> Option<PathBuf> {
    let mut resolved = parent.to_path_buf();
    let mut descended = false;
    for component in link_target.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                descended = true;
            }
            Component::CurDir => {}
            Component::ParentDir if !descended => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Normalise a path lexically, without touching the filesystem.
#[cfg_attr(unix, allow(dead_code))]
fn lexical_join(base: &Path, relative: &Path) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::ParentDir => {
                joined.pop();
            }
            Component::Normal(part) => joined.push(part),
            _ => {}
        }
    }
    joined
}

struct Extractor<'a> {
    archive: &'a Path,
    target: &'a Path,
    /// Canonical form of `target`
    root: PathBuf,
    strip_prefix: Option<&'a str>,
    /// (link location, link source) pairs materialised as copies where
    /// symbolic links are unavailable
    deferred_links: Vec<(PathBuf, PathBuf)>,
    files: usize,
}

impl Extractor<'_> {
    fn archive_error(&self, message: impl std::fmt::Display) -> Error {
        Error::archive(self.archive, message.to_string())
    }

    /// Destination of an entry relative to the target, or `None` for the
    /// stripped root directory itself.
    fn relative_path(&self, raw: &str) -> Result<Option<PathBuf>> {
        let normalised = raw.replace('\\', "/");
        let clean = sanitize(Path::new(&normalised))
            .ok_or_else(|| Error::unsafe_entry(raw, self.archive))?;
        let Some(prefix) = self.strip_prefix else {
            return Ok((!clean.as_os_str().is_empty()).then_some(clean));
        };
        match clean.strip_prefix(prefix) {
            Ok(rest) if rest.as_os_str().is_empty() => Ok(None),
            Ok(rest) => Ok(Some(rest.to_path_buf())),
            Err(_) => Err(self.archive_error(format!(
                "entry '{raw}' is outside the expected top-level directory '{prefix}'"
            ))),
        }
    }

    /// Create the parent of `dest`, make sure it resolves inside the target
    /// and clear whatever already occupies `dest`.
    ///
    /// Returns the canonical parent directory.
    fn prepare_destination(&self, raw: &str, dest: &Path) -> Result<PathBuf> {
        let parent = dest.parent().unwrap_or(self.target);
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        let resolved = parent
            .canonicalize()
            .map_err(|e| Error::io(e, parent, "canonicalize"))?;
        if !resolved.starts_with(&self.root) {
            return Err(Error::unsafe_entry(raw, self.archive));
        }

        match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => Err(self.archive_error(format!(
                "entry '{raw}' would replace a directory"
            ))),
            Ok(_) => {
                debug!(entry = %raw, "Replacing existing entry");
                fs::remove_file(dest).map_err(|e| Error::io(e, dest, "remove_file"))?;
                Ok(resolved)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(resolved),
            Err(e) => Err(Error::io(e, dest, "symlink_metadata")),
        }
    }

    fn write_file(&mut self, raw: &str, relative: &Path, reader: &mut dyn Read, mode: Option<u32>) -> Result<()> {
        let dest = self.target.join(relative);
        self.prepare_destination(raw, &dest)?;
        let mut out = File::options()
            .write(true)
            .create_new(true)
            .open(&dest)
            .map_err(|e| Error::io(e, &dest, "create"))?;
        io::copy(reader, &mut out).map_err(|e| Error::io(e, &dest, "write"))?;
        drop(out);

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode & PERMISSION_MASK))
                .map_err(|e| Error::io(e, &dest, "set_permissions"))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        self.files += 1;
        Ok(())
    }

    fn write_symlink(&mut self, raw: &str, relative: &Path, link_target: &Path) -> Result<()> {
        let dest = self.target.join(relative);
        let parent = self.prepare_destination(raw, &dest)?;
        if !resolve_link(&parent, link_target).is_some_and(|p| p.starts_with(&self.root)) {
            return Err(Error::unsafe_entry(raw, self.archive));
        }

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(link_target, &dest)
                .map_err(|e| Error::io(e, &dest, "symlink"))?;
        }
        #[cfg(not(unix))]
        {
            let source = lexical_join(dest.parent().unwrap_or(self.target), link_target);
            self.deferred_links.push((dest, source));
        }
        Ok(())
    }

    fn write_hard_link(&mut self, raw: &str, relative: &Path, link_target: &str) -> Result<()> {
        let Some(source_relative) = self.relative_path(link_target)? else {
            return Err(Error::unsafe_entry(raw, self.archive));
        };
        let dest = self.target.join(relative);
        self.prepare_destination(raw, &dest)?;
        let source = self.target.join(source_relative);
        if fs::hard_link(&source, &dest).is_err() {
            fs::copy(&source, &dest).map_err(|e| Error::io(e, &dest, "copy"))?;
        }
        self.files += 1;
        Ok(())
    }

    fn tar_gz(&mut self) -> Result<()> {
        let file = File::open(self.archive).map_err(|e| Error::io(e, self.archive, "open"))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let entries = archive
            .entries()
            .map_err(|e| self.archive_error(e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| self.archive_error(e))?;
            let kind = entry.header().entry_type();
            if matches!(
                kind,
                tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
            ) {
                continue;
            }
            let raw = entry
                .path()
                .map_err(|e| self.archive_error(e))?
                .to_string_lossy()
                .to_string();
            let Some(relative) = self.relative_path(&raw)? else {
                continue;
            };

            if kind.is_dir() {
                let dest = self.target.join(&relative);
                fs::create_dir_all(&dest).map_err(|e| Error::io(e, &dest, "create_dir_all"))?;
            } else if kind.is_symlink() {
                let link = entry
                    .link_name()
                    .map_err(|e| self.archive_error(e))?
                    .ok_or_else(|| self.archive_error(format!("symlink '{raw}' has no target")))?
                    .to_path_buf();
                self.write_symlink(&raw, &relative, &link)?;
            } else if kind.is_hard_link() {
                let link = entry
                    .link_name()
                    .map_err(|e| self.archive_error(e))?
                    .ok_or_else(|| self.archive_error(format!("hard link '{raw}' has no target")))?
                    .to_string_lossy()
                    .to_string();
                self.write_hard_link(&raw, &relative, &link)?;
            } else if kind.is_file() || kind.is_contiguous() {
                let mode = entry.header().mode().ok();
                self.write_file(&raw, &relative, &mut entry, mode)?;
            } else {
                debug!(entry = %raw, "Skipping special archive entry");
            }
        }
        Ok(())
    }

    fn zip(&mut self) -> Result<()> {
        let file = File::open(self.archive).map_err(|e| Error::io(e, self.archive, "open"))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| self.archive_error(e))?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| self.archive_error(e))?;
            let raw = entry.name().to_string();
            let Some(relative) = self.relative_path(&raw)? else {
                continue;
            };
            let mode = entry.unix_mode();

            if entry.is_dir() {
                let dest = self.target.join(&relative);
                fs::create_dir_all(&dest).map_err(|e| Error::io(e, &dest, "create_dir_all"))?;
            } else if mode.is_some_and(|m| m & FILE_TYPE_MASK == SYMLINK_TYPE) {
                let mut link = String::new();
                entry
                    .read_to_string(&mut link)
                    .map_err(|e| self.archive_error(e))?;
                self.write_symlink(&raw, &relative, Path::new(&link))?;
            } else {
                self.write_file(&raw, &relative, &mut entry, mode)?;
            }
        }
        Ok(())
    }

    /// Materialise links that could not be created as symbolic links.
    fn finish(&mut self) -> Result<()> {
        for (dest, source) in std::mem::take(&mut self.deferred_links) {
            if source.is_dir() {
                warn!(link = %dest.display(), "Skipping directory link on this platform");
                continue;
            }
            fs::copy(&source, &dest).map_err(|e| Error::io(e, &dest, "copy"))?;
            self.files += 1;
        }
        Ok(())
    }
}
