//! Subcommand implementations
//!
//! Every command except `platform` needs a project: the configuration file
//! is loaded, the toolchain is wired to the install cache and the standard
//! pipeline is built on top of it.

pub mod exec;
pub mod install;
pub mod platform;
pub mod run;

use crate::cli::{Cli, Commands};
use crate::console::ConsoleSink;
use crate::errors::{CliError, CliResult};
use nodekit_core::Config;
use nodekit_tasks::{CommandExecutor, Pipeline, Toolchain, fingerprint_store, standard_pipeline};
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

/// A loaded project and the services commands run against
pub struct Project {
    pub toolchain: Arc<Toolchain>,
    pub executor: Arc<CommandExecutor>,
}

impl Project {
    /// Load the project described by the configuration at `path`.
    pub fn load(path: &Path) -> CliResult<Self> {
        Self::from_config(load_config(path)?)
    }

    pub fn from_config(config: Config) -> CliResult<Self> {
        tracing::debug!(
            project = %config.working_directory.display(),
            node = %config.node.version,
            "Loaded project configuration"
        );
        Ok(Self {
            toolchain: Arc::new(Toolchain::from_config(config)?),
            executor: Arc::new(CommandExecutor::new(Arc::new(ConsoleSink))),
        })
    }

    pub fn config(&self) -> &Config {
        self.toolchain.config()
    }

    /// The standard pipeline for this project.
    pub fn pipeline(&self) -> CliResult<Pipeline> {
        let store = fingerprint_store(self.config())?;
        Ok(standard_pipeline(
            self.toolchain.clone(),
            self.executor.clone(),
            store,
        )?)
    }
}

/// Read and validate the configuration file.
pub fn load_config(path: &Path) -> CliResult<Config> {
    if !path.is_file() {
        return Err(CliError::ConfigMissing {
            path: path.display().to_string(),
        });
    }
    Ok(Config::load(path)?)
}

/// Run the parsed command line.
pub async fn execute(cli: Cli) -> CliResult<()> {
    let span = tracing::info_span!("command", command = ?cli.command);
    dispatch(cli).instrument(span).await
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Platform => platform::execute(&cli.config),
        Commands::InstallNode => install::install_node(&Project::load(&cli.config)?).await,
        Commands::InstallPackageManager => {
            install::install_package_manager(&Project::load(&cli.config)?).await
        }
        Commands::Install => install::install_dependencies(&Project::load(&cli.config)?).await,
        Commands::Run { scripts } => run::execute(&cli.config, &scripts).await,
        Commands::Build => run::execute(&cli.config, &[]).await,
        Commands::Exec { tool, args } => exec::execute(&Project::load(&cli.config)?, tool, args).await,
    }
}
