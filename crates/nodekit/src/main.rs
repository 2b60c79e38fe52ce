//! nodekit command line
//!
//! Reads `nodekit.toml`, provisions Node.js and the package manager into the
//! shared cache and runs the project's build pipeline.

mod cli;
mod commands;
mod console;
mod errors;
mod tracing;

use crate::errors::EXIT_FAILURE;
use crate::tracing::{TracingConfig, TracingFormat};
use std::io::Write;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: if cli.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        },
        level: cli.level.into(),
        ..Default::default()
    };
    if let Err(error) = crate::tracing::init_tracing(tracing_config) {
        let _ = writeln!(std::io::stderr(), "{error:?}");
        return ExitCode::from(EXIT_FAILURE);
    }

    match commands::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = error.exit_code();
            let _ = writeln!(std::io::stderr(), "{:?}", miette::Report::new(error));
            ExitCode::from(code)
        }
    }
}
