//! `run` and `build`

use super::{Project, load_config};
use crate::console::print_summary;
use crate::errors::{CliError, CliResult};
use nodekit_core::Config;
use nodekit_core::config::ScriptConfig;
use std::path::Path;

/// Keep only the named scripts, in the order they were named. An empty
/// selection keeps every configured script.
pub fn select_scripts(config: &Config, names: &[String]) -> CliResult<Vec<ScriptConfig>> {
    if names.is_empty() {
        return Ok(config.scripts.clone());
    }
    names
        .iter()
        .map(|name| {
            config.script(name).cloned().ok_or_else(|| {
                CliError::unknown_script(name, config.scripts.iter().map(|s| s.name.as_str()))
            })
        })
        .collect()
}

/// Run the pipeline through the selected scripts.
pub async fn execute(config_path: &Path, scripts: &[String]) -> CliResult<()> {
    let mut config = load_config(config_path)?;
    config.scripts = select_scripts(&config, scripts)?;
    let project = Project::from_config(config)?;
    let reports = project.pipeline()?.run().await?;
    print_summary(&reports);
    Ok(())
}
