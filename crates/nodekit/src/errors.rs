//! CLI error type and process exit codes
//!
//! Library errors are wrapped so that miette renders their codes and help
//! text, while the exit code follows what failed: a script's own exit code is
//! passed through, configuration problems exit with 2, everything else with 3.

use miette::Diagnostic;
use thiserror::Error;

/// Exit code for invalid configuration or arguments
pub const EXIT_CONFIG: u8 = 2;

/// Exit code for every other failure
pub const EXIT_FAILURE: u8 = 3;

/// CLI-specific error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Configuration file {path} not found")]
    #[diagnostic(
        code(nodekit::cli::config_missing),
        help("Create a nodekit.toml next to package.json or pass --config")
    )]
    ConfigMissing { path: String },

    #[error("Unknown script '{name}'")]
    #[diagnostic(code(nodekit::cli::unknown_script))]
    UnknownScript {
        name: String,
        #[help]
        available: Option<String>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Nodekit(#[from] nodekit_core::Error),
}

impl CliError {
    pub fn unknown_script<'a>(
        name: impl Into<String>,
        available: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let available = available.into_iter().collect::<Vec<_>>();
        Self::UnknownScript {
            name: name.into(),
            available: (!available.is_empty())
                .then(|| format!("Configured scripts: {}", available.join(", "))),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigMissing { .. } | Self::UnknownScript { .. } => EXIT_CONFIG,
            Self::Nodekit(error) => match error.root() {
                nodekit_core::Error::Configuration { .. } | nodekit_core::Error::Validation { .. } => {
                    EXIT_CONFIG
                }
                _ => error
                    .exit_code()
                    .and_then(|code| u8::try_from(code).ok())
                    .filter(|code| *code != 0)
                    .unwrap_or(EXIT_FAILURE),
            },
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
