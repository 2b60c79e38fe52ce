//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for fingerprint operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(nodekit::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// A declared input does not exist
    #[error("Declared input not found: {}", path.display())]
    #[diagnostic(
        code(nodekit::cache::missing_input),
        help("Remove the path from the script's inputs or create it")
    )]
    MissingInput {
        /// The missing path
        path: Box<Path>,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(nodekit::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
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

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

impl From<Error> for nodekit_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io {
                source,
                path,
                operation,
            } => Self::Io {
                source,
                path,
                operation,
            },
            Error::MissingInput { path } => Self::validation(format!(
                "declared input not found: {}",
                path.display()
            )),
            Error::Serialization { message } => Self::serialization(message),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
