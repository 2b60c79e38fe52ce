//! Error types shared by every nodekit crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Why a download did not produce a usable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    /// The server answered with a non-success status code.
    Status(u16),
    /// The request did not finish within the configured timeout.
    Timeout,
    /// Connection, TLS or body transfer failure.
    Network(String),
    /// The redirect chain exceeded the configured limit.
    TooManyRedirects,
    /// The body ended before the announced length was received.
    Incomplete {
        /// Bytes announced by `Content-Length`
        expected: u64,
        /// Bytes actually written
        actual: u64,
    },
    /// The file does not match the published SHA-256 digest.
    ChecksumMismatch {
        /// Published digest
        expected: String,
        /// Digest of the downloaded file
        actual: String,
    },
}

impl DownloadFailure {
    /// HTTP status code, when the failure came from the server.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP status {code}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::TooManyRedirects => write!(f, "too many redirects"),
            Self::Incomplete { expected, actual } => write!(
                f,
                "incomplete body: expected {expected} bytes, received {actual}"
            ),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

/// Main error type for nodekit operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The host operating system or CPU architecture is not supported
    #[error("Unsupported platform: {os}/{arch}")]
    #[diagnostic(
        code(nodekit::platform::unsupported),
        help("Supported hosts are Linux, macOS and Windows on x64, x86, arm64, armv7l, ppc64le and s390x")
    )]
    UnsupportedPlatform {
        /// Operating system as reported by the host
        os: String,
        /// Architecture as reported by the host
        arch: String,
    },

    /// No archive is published for this tool, version and platform
    #[error("No {tool} {version} distribution for {platform}: {reason}")]
    #[diagnostic(
        code(nodekit::distribution::unresolvable),
        help("Pick another version, or point the distribution URL settings at a mirror that publishes this platform")
    )]
    UnresolvableDistribution {
        /// Tool name
        tool: String,
        /// Requested version
        version: String,
        /// Platform triple
        platform: String,
        /// What is missing
        reason: String,
    },

    /// Fetching a distribution failed
    #[error("Download of {url} failed: {failure}")]
    #[diagnostic(
        code(nodekit::download),
        help("Check network access, proxy and credentials for the distribution mirror")
    )]
    Download {
        /// URL that was requested
        url: String,
        /// Failure detail
        failure: DownloadFailure,
    },

    /// An archive entry would be written outside the extraction directory
    #[error("Unsafe archive entry {entry:?} in {}", archive.display())]
    #[diagnostic(
        code(nodekit::archive::unsafe_entry),
        help("The archive is corrupt or malicious; it was not extracted")
    )]
    UnsafeArchiveEntry {
        /// Entry name as stored in the archive
        entry: String,
        /// Archive file
        archive: Box<Path>,
    },

    /// The archive could not be read
    #[error("Archive {} could not be extracted: {message}", archive.display())]
    #[diagnostic(code(nodekit::archive::invalid))]
    Archive {
        /// Archive file
        archive: Box<Path>,
        /// Error message
        message: String,
    },

    /// The extracted distribution does not contain a usable executable
    #[error("Installation of {tool} {version} failed verification: {message}")]
    #[diagnostic(
        code(nodekit::install::verification),
        help("The distribution layout differs from the expected one; the partial installation was removed")
    )]
    InstallationVerification {
        /// Tool name
        tool: String,
        /// Requested version
        version: String,
        /// Directory that was checked
        path: Box<Path>,
        /// What is wrong
        message: String,
    },

    /// A child process exited unsuccessfully
    #[error("Command `{command}` failed with exit code {exit_code}")]
    #[diagnostic(code(nodekit::command::failed))]
    CommandExecution {
        /// Command line as it was invoked
        command: String,
        /// Exit code, or -1 when terminated by a signal
        exit_code: i32,
    },

    /// Another process held the installation lock for too long
    #[error("Timed out after {seconds}s waiting for cache lock {}", path.display())]
    #[diagnostic(
        code(nodekit::cache::lock_timeout),
        help("Another build may be stuck installing the same tool; remove the lock file if no build is running")
    )]
    CacheLockTimeout {
        /// Lock file
        path: Box<Path>,
        /// Seconds waited
        seconds: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(nodekit::config::invalid))]
    Configuration {
        /// Error message
        message: String,
    },

    /// Validation error
    #[error("Validation failed: {message}")]
    #[diagnostic(code(nodekit::validation::failed))]
    Validation {
        /// Error message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(nodekit::serialization))]
    Serialization {
        /// Error message
        message: String,
    },

    /// I/O error with optional path context
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(nodekit::io::error),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// A pipeline unit failed; the cause is kept intact
    #[error("{unit} failed: {source}")]
    #[diagnostic(code(nodekit::pipeline::unit_failed))]
    Unit {
        /// Unit name
        unit: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a validation error
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a download error
    #[must_use]
    pub fn download(url: impl Into<String>, failure: DownloadFailure) -> Self {
        Self::Download {
            url: url.into(),
            failure,
        }
    }

    /// Create an unsafe archive entry error
    #[must_use]
    pub fn unsafe_entry(entry: impl Into<String>, archive: impl AsRef<Path>) -> Self {
        Self::UnsafeArchiveEntry {
            entry: entry.into(),
            archive: archive.as_ref().into(),
        }
    }

    /// Create an archive read error
    #[must_use]
    pub fn archive(archive: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Archive {
            archive: archive.as_ref().into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the name of the pipeline unit that produced it
    #[must_use]
    pub fn unit(unit: impl Into<String>, source: Self) -> Self {
        Self::Unit {
            unit: unit.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only network-level download failures qualify. HTTP status errors,
    /// checksum mismatches and everything on the local side are definitive.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Download {
                failure: DownloadFailure::Timeout
                    | DownloadFailure::Network(_)
                    | DownloadFailure::Incomplete { .. },
                ..
            }
        )
    }

    /// Innermost error, looking through pipeline unit wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Unit { source, .. } => source.root(),
            other => other,
        }
    }

    /// Exit code of a failed child process, if that is what failed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.root() {
            Self::CommandExecution { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_no_path(source, "operation")
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::serialization(source.to_string())
    }
}

/// Result type alias for nodekit operations
pub type Result<T> = std::result::Result<T, Error>;
