//! Build orchestration for nodekit
//!
//! - [`executor`] starts child processes the way the host OS requires and
//!   streams their output line by line
//! - [`pipeline`] runs fingerprinted units in order and skips those whose
//!   inputs did not change
//! - [`units`] defines the standard frontend build units on top of an
//!   installed toolchain

#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod executor;
pub mod pipeline;
pub mod units;

pub use executor::{
    BufferedSink, CommandExecutor, ExecutionRequest, ExecutionResult, OutputSink, Stream,
    TracingSink,
};
pub use pipeline::{Pipeline, PipelineContext, Unit, UnitOutcome, UnitReport};
pub use units::{
    INSTALL_DEPENDENCIES, INSTALL_NODE, INSTALL_PACKAGE_MANAGER, InstallDependenciesUnit,
    InstallNodeUnit, InstallPackageManagerUnit, RUN_SCRIPT_PREFIX, RunScriptUnit, Toolchain,
    fingerprint_store, standard_pipeline,
};
