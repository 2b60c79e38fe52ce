//! Toolchain distributions for nodekit
//!
//! Resolves download URLs for Node.js and package manager releases, fetches
//! them with retries, unpacks them safely and installs them into a cache
//! directory shared by concurrent builds.
//!
//! ```text
//! ToolSpec + Platform ──▶ DistributionUrlBuilder ──▶ DistributionDescriptor
//!                                                        │
//!                  InstallationManager::ensure_installed ◀┘
//!                    lock ─▶ download ─▶ extract ─▶ verify ─▶ rename ─▶ marker
//! ```

pub mod cache;
pub mod distribution;
pub mod download;
pub mod extract;
pub mod manager;

pub use cache::{COMPLETION_MARKER, CacheKey, CacheLock, InstallCache, InstallReceipt};
pub use distribution::{
    ArchiveFormat, DistributionDescriptor, DistributionSettings, DistributionUrlBuilder, Launcher,
};
pub use download::{DownloadOptions, Fetcher, HttpDownloader, parse_shasums, sha256_file};
pub use extract::extract_archive;
pub use manager::{InstallState, Installation, InstallationManager};
