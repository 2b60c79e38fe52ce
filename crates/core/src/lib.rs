//! Core types for nodekit
//!
//! This crate holds what every other nodekit crate shares:
//! - The error taxonomy ([`Error`], [`DownloadFailure`])
//! - Platform identification ([`platform`])
//! - Tool identities and version specs ([`tool`])
//! - Project configuration ([`config`]) and `package.json` reading ([`manifest`])
//! - Cache and state directory resolution ([`paths`])
//! - Process invocation policy ([`shell`]) and retry with backoff ([`retry`])

mod error;

pub mod config;
pub mod manifest;
pub mod paths;
pub mod platform;
pub mod retry;
pub mod shell;
pub mod tool;

pub use config::Config;
pub use error::{DownloadFailure, Error, Result};
pub use platform::{Arch, FixedPlatformResolver, HostPlatformResolver, Libc, Os, Platform, PlatformResolver};
pub use retry::{RetryConfig, with_retry};
pub use shell::{Invocation, ShellWrapping};
pub use tool::{PackageManagerKind, Tool, ToolSpec};
