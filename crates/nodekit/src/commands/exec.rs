//! `exec node|pm -- ARGS`: run a toolchain executable with the project's PATH

use super::Project;
use crate::cli::ExecTool;
use crate::errors::CliResult;
use nodekit_tasks::INSTALL_PACKAGE_MANAGER;

/// Install whatever is missing, then run the executable in the project
/// directory. A non-zero exit surfaces as a command error carrying the code.
pub async fn execute(project: &Project, tool: ExecTool, args: Vec<String>) -> CliResult<()> {
    project
        .pipeline()?
        .run_until(INSTALL_PACKAGE_MANAGER)
        .await?;
    let request = match tool {
        ExecTool::Node => project.toolchain.node_command(args).await?,
        ExecTool::Pm => project.toolchain.package_manager_command(args).await?,
    };
    tracing::info!(executable = %request.executable.display(), "Executing");
    project.executor.execute(&request).await?;
    Ok(())
}
