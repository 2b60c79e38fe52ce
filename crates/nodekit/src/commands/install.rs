//! `install-node`, `install-package-manager` and `install`

use super::Project;
use crate::console::{print_result, print_summary};
use crate::errors::CliResult;
use nodekit_tasks::{INSTALL_DEPENDENCIES, INSTALL_NODE, INSTALL_PACKAGE_MANAGER};

/// Install Node.js and print its installation directory.
pub async fn install_node(project: &Project) -> CliResult<()> {
    let reports = project.pipeline()?.run_until(INSTALL_NODE).await?;
    print_summary(&reports);
    let runtime = project.toolchain.runtime().await?;
    print_result(runtime.install_dir.display());
    Ok(())
}

/// Install the package manager, printing its directory when one is declared.
pub async fn install_package_manager(project: &Project) -> CliResult<()> {
    let reports = project
        .pipeline()?
        .run_until(INSTALL_PACKAGE_MANAGER)
        .await?;
    print_summary(&reports);
    match project.toolchain.package_manager().await? {
        Some(installation) => print_result(installation.install_dir.display()),
        None => tracing::info!("No package manager declared, npm bundled with Node.js is used"),
    }
    Ok(())
}

pub async fn install_dependencies(project: &Project) -> CliResult<()> {
    let reports = project.pipeline()?.run_until(INSTALL_DEPENDENCIES).await?;
    print_summary(&reports);
    Ok(())
}
