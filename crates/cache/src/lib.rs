//! Up-to-date tracking for nodekit pipeline units
//!
//! A unit is skipped when the fingerprint of its inputs matches the one
//! recorded after its last successful run and its declared outputs still
//! exist. This crate provides:
//! - Deterministic fingerprint computation over named inputs
//! - Content hashing of files and directories
//! - A per-project fingerprint index and output marker files
//!
//! # Fingerprint Computation
//!
//! Fingerprints are computed from:
//! - Tool versions and distribution settings
//! - Content hashes of manifests, lock files and declared inputs
//! - The unit name, platform and nodekit version

#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

mod error;
pub mod fingerprint;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use fingerprint::{
    FingerprintEnvelope, compute_fingerprint, hash_file, hash_inputs, hash_optional_file,
    hash_path,
};
pub use store::{FingerprintIndex, FingerprintRecord, FingerprintStore};
