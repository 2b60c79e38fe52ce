//! The standard frontend build units
//!
//! `install-node` → `install-package-manager` → `install-dependencies` →
//! `run-script:<name>` for every configured script, in configuration order.

use crate::executor::{CommandExecutor, ExecutionRequest, ExecutionResult};
use crate::pipeline::{Pipeline, PipelineContext, Unit};
use async_trait::async_trait;
use nodekit_cache::{
    FingerprintEnvelope, FingerprintStore, hash_inputs, hash_optional_file,
};
use nodekit_core::config::ScriptConfig;
use nodekit_core::manifest::{LOCK_FILES, PackageJson};
use nodekit_core::{Config, Error, Result, ToolSpec, paths};
use nodekit_install::{CacheKey, Installation, InstallationManager, Launcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const INSTALL_NODE: &str = "install-node";
pub const INSTALL_PACKAGE_MANAGER: &str = "install-package-manager";
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
pub const RUN_SCRIPT_PREFIX: &str = "run-script:";

/// Node.js and the package manager configured for one project
#[derive(Debug)]
pub struct Toolchain {
    config: Config,
    manager: InstallationManager,
}

impl Toolchain {
    #[must_use]
    pub fn new(config: Config, manager: InstallationManager) -> Self {
        Self { config, manager }
    }

    /// # Errors
    ///
    /// See [`InstallationManager::from_config`].
    pub fn from_config(config: Config) -> Result<Self> {
        let manager = InstallationManager::from_config(&config)?;
        Ok(Self::new(config, manager))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn manager(&self) -> &InstallationManager {
        &self.manager
    }

    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.config.working_directory
    }

    /// The Node.js runtime, installed on demand.
    ///
    /// # Errors
    ///
    /// Returns installation errors.
    pub async fn runtime(&self) -> Result<Installation> {
        let spec = self.config.node_spec();
        match &self.config.node.install_directory {
            Some(dir) => self.manager.provided(&spec, dir),
            None => self.manager.ensure_installed(&spec).await,
        }
    }

    /// The package manager declared for the project, installed on demand.
    /// `None` means the npm bundled with Node.js is used.
    ///
    /// # Errors
    ///
    /// Returns declaration or installation errors.
    pub async fn package_manager(&self) -> Result<Option<Installation>> {
        match self.config.package_manager_spec()? {
            Some(spec) => self.manager.ensure_installed(&spec).await.map(Some),
            None => Ok(None),
        }
    }

    /// Paths whose existence proves that `spec` is installed.
    fn install_outputs(&self, spec: &ToolSpec, provided: Option<&Path>) -> Result<Vec<PathBuf>> {
        let descriptor = self.manager.descriptor(spec)?;
        Ok(vec![match provided {
            Some(dir) => dir.join(&descriptor.executable),
            None => self
                .manager
                .cache()
                .marker_path(&CacheKey::new(spec, descriptor.platform)),
        }])
    }

    /// A command running `node` with `args`.
    ///
    /// # Errors
    ///
    /// Returns installation errors.
    pub async fn node_command<I, S>(&self, args: I) -> Result<ExecutionRequest>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let node = self.runtime().await?;
        Ok(ExecutionRequest::new(&node.executable, self.project_dir())
            .args(args)
            .prepend_path(&node.bin_dir))
    }

    /// A command running the package manager with `args`.
    ///
    /// Downloaded package managers are JavaScript entry points started by the
    /// runtime; without one, the npm shipped with Node.js is used.
    ///
    /// # Errors
    ///
    /// Returns installation errors.
    pub async fn package_manager_command<I, S>(&self, args: I) -> Result<ExecutionRequest>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let node = self.runtime().await?;
        let request = match self.package_manager().await? {
            Some(pm) if pm.launcher == Launcher::NodeScript => {
                ExecutionRequest::new(&node.executable, self.project_dir())
                    .arg(pm.executable.to_string_lossy())
                    .prepend_path(&pm.bin_dir)
            }
            Some(pm) => ExecutionRequest::new(&pm.executable, self.project_dir())
                .prepend_path(&pm.bin_dir),
            None => {
                let npm = if node.platform.is_windows() {
                    node.install_dir.join("npm.cmd")
                } else {
                    node.bin_dir.join("npm")
                };
                ExecutionRequest::new(npm, self.project_dir())
            }
        };
        Ok(request.args(args).prepend_path(&node.bin_dir))
    }

    /// Tool versions every later unit depends on
    fn toolchain_inputs(&self, envelope: FingerprintEnvelope) -> Result<FingerprintEnvelope> {
        let pm = self
            .config
            .package_manager_spec()?
            .map_or_else(|| "npm (bundled)".to_string(), |spec| spec.to_string());
        Ok(envelope
            .with_input("node", self.config.node.version.clone())
            .with_input("package-manager", pm))
    }
}

/// Split a package manager command line into arguments, honouring quotes.
fn split_command(command: &str) -> Result<Vec<String>> {
    shlex::split(command).ok_or_else(|| {
        Error::configuration(format!("unbalanced quotes in command '{command}'"))
    })
}

fn manifest_hash(project_dir: &Path) -> Result<Option<String>> {
    Ok(hash_optional_file(&PackageJson::path_in(project_dir))?)
}

/// Add the hash of every lock file present in `project_dir`.
fn with_lock_files(
    mut envelope: FingerprintEnvelope,
    project_dir: &Path,
) -> Result<FingerprintEnvelope> {
    for lock_file in LOCK_FILES {
        if let Some(hash) = hash_optional_file(&project_dir.join(lock_file))? {
            envelope = envelope.with_input(*lock_file, hash);
        }
    }
    Ok(envelope)
}

/// Installs the Node.js runtime
#[derive(Debug)]
pub struct InstallNodeUnit {
    toolchain: Arc<Toolchain>,
}

impl InstallNodeUnit {
    #[must_use]
    pub fn new(toolchain: Arc<Toolchain>) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl Unit for InstallNodeUnit {
    fn name(&self) -> String {
        INSTALL_NODE.to_string()
    }

    async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>> {
        let config = self.toolchain.config();
        let spec = config.node_spec();
        let envelope = FingerprintEnvelope::new(INSTALL_NODE, ctx.platform.to_string())
            .with_input("version", spec.version.clone());
        let envelope = match &config.node.install_directory {
            Some(dir) => envelope.with_input("provided", dir.display().to_string()),
            None => envelope.with_input("url", self.toolchain.manager().descriptor(&spec)?.url),
        };
        Ok(Some(envelope))
    }

    async fn outputs(&self, _ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
        let config = self.toolchain.config();
        self.toolchain
            .install_outputs(&config.node_spec(), config.node.install_directory.as_deref())
    }

    async fn run(&self, _ctx: &PipelineContext) -> Result<ExecutionResult> {
        self.toolchain.runtime().await?;
        Ok(ExecutionResult::executed(0))
    }
}

/// Installs the package manager declared for the project
#[derive(Debug)]
pub struct InstallPackageManagerUnit {
    toolchain: Arc<Toolchain>,
}

impl InstallPackageManagerUnit {
    #[must_use]
    pub fn new(toolchain: Arc<Toolchain>) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl Unit for InstallPackageManagerUnit {
    fn name(&self) -> String {
        INSTALL_PACKAGE_MANAGER.to_string()
    }

    async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>> {
        let Some(spec) = self.toolchain.config().package_manager_spec()? else {
            return Ok(None);
        };
        let descriptor = self.toolchain.manager().descriptor(&spec)?;
        Ok(Some(
            FingerprintEnvelope::new(INSTALL_PACKAGE_MANAGER, ctx.platform.to_string())
                .with_input("tool", spec.tool.to_string())
                .with_input("version", spec.version)
                .with_input("url", descriptor.url),
        ))
    }

    async fn outputs(&self, _ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
        match self.toolchain.config().package_manager_spec()? {
            Some(spec) => self.toolchain.install_outputs(&spec, None),
            None => Ok(Vec::new()),
        }
    }

    async fn run(&self, _ctx: &PipelineContext) -> Result<ExecutionResult> {
        self.toolchain.package_manager().await?;
        Ok(ExecutionResult::executed(0))
    }
}

/// Installs the project's dependencies into `node_modules`
#[derive(Debug)]
pub struct InstallDependenciesUnit {
    toolchain: Arc<Toolchain>,
    executor: Arc<CommandExecutor>,
}

impl InstallDependenciesUnit {
    #[must_use]
    pub fn new(toolchain: Arc<Toolchain>, executor: Arc<CommandExecutor>) -> Self {
        Self {
            toolchain,
            executor,
        }
    }
}

#[async_trait]
impl Unit for InstallDependenciesUnit {
    fn name(&self) -> String {
        INSTALL_DEPENDENCIES.to_string()
    }

    async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>> {
        let Some(manifest) = manifest_hash(&ctx.project_dir)? else {
            return Ok(None);
        };
        let envelope = FingerprintEnvelope::new(INSTALL_DEPENDENCIES, ctx.platform.to_string())
            .with_input("package.json", manifest)
            .with_input(
                "install-script",
                self.toolchain.config().package_manager.install_script.clone(),
            );
        let envelope = with_lock_files(envelope, &ctx.project_dir)?;
        self.toolchain.toolchain_inputs(envelope).map(Some)
    }

    async fn outputs(&self, ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
        Ok(vec![ctx.project_dir.join("node_modules")])
    }

    async fn run(&self, _ctx: &PipelineContext) -> Result<ExecutionResult> {
        let script = &self.toolchain.config().package_manager.install_script;
        let request = self
            .toolchain
            .package_manager_command(split_command(script)?)
            .await?;
        self.executor.execute(&request).await
    }
}

/// Runs one configured script through the package manager
#[derive(Debug)]
pub struct RunScriptUnit {
    toolchain: Arc<Toolchain>,
    executor: Arc<CommandExecutor>,
    script: ScriptConfig,
}

impl RunScriptUnit {
    #[must_use]
    pub fn new(
        toolchain: Arc<Toolchain>,
        executor: Arc<CommandExecutor>,
        script: ScriptConfig,
    ) -> Self {
        Self {
            toolchain,
            executor,
            script,
        }
    }

    /// Unit name of a script
    #[must_use]
    pub fn unit_name(script: &str) -> String {
        format!("{RUN_SCRIPT_PREFIX}{script}")
    }
}

#[async_trait]
impl Unit for RunScriptUnit {
    fn name(&self) -> String {
        Self::unit_name(&self.script.name)
    }

    async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>> {
        let mut envelope = FingerprintEnvelope::new(self.name(), ctx.platform.to_string())
            .with_input("command", self.script.command.clone())
            .with_inputs(hash_inputs(&ctx.project_dir, &self.script.inputs)?);
        if let Some(manifest) = manifest_hash(&ctx.project_dir)? {
            envelope = envelope.with_input("package.json", manifest);
        }
        for (key, value) in &self.script.env {
            envelope = envelope.with_input(format!("env:{key}"), value.clone());
        }
        let envelope = with_lock_files(envelope, &ctx.project_dir)?;
        self.toolchain.toolchain_inputs(envelope).map(Some)
    }

    async fn outputs(&self, ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
        Ok(vec![ctx.store.marker_path(&ctx.project_dir, &self.name())])
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<ExecutionResult> {
        let request = self
            .toolchain
            .package_manager_command(split_command(&self.script.command)?)
            .await?
            .envs(&self.script.env);
        let result = self.executor.execute(&request).await?;
        ctx.store.touch_marker(&ctx.project_dir, &self.name())?;
        Ok(result)
    }
}

/// Fingerprint store for a configuration: `NODEKIT_STATE_DIR`, else
/// `<cache root>/state`.
///
/// # Errors
///
/// Returns an error when no cache directory is usable.
pub fn fingerprint_store(config: &Config) -> Result<FingerprintStore> {
    Ok(FingerprintStore::new(paths::state_dir(&config.cache_root()?)))
}

/// The standard pipeline for a project.
///
/// # Errors
///
/// Returns `UnsupportedPlatform` when the platform cannot be resolved.
pub fn standard_pipeline(
    toolchain: Arc<Toolchain>,
    executor: Arc<CommandExecutor>,
    store: FingerprintStore,
) -> Result<Pipeline> {
    let context = PipelineContext {
        project_dir: toolchain.project_dir().to_path_buf(),
        platform: toolchain.manager().platform()?,
        store,
    };
    let mut pipeline = Pipeline::new(context)
        .with_unit(InstallNodeUnit::new(toolchain.clone()))
        .with_unit(InstallPackageManagerUnit::new(toolchain.clone()))
        .with_unit(InstallDependenciesUnit::new(
            toolchain.clone(),
            executor.clone(),
        ));
    for script in &toolchain.config().scripts {
        pipeline.push(Box::new(RunScriptUnit::new(
            toolchain.clone(),
            executor.clone(),
            script.clone(),
        )));
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("run  build --prod").unwrap(),
            ["run", "build", "--prod"]
        );
        assert!(split_command("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_command_keeps_quoted_arguments() {
        assert_eq!(
            split_command(r#"run build -- --title "a b" 'c d'"#).unwrap(),
            ["run", "build", "--", "--title", "a b", "c d"]
        );
    }

    #[test]
    fn test_split_command_rejects_unbalanced_quotes() {
        let err = split_command(r#"run build -- --title "a b"#).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_script_unit_name() {
        assert_eq!(RunScriptUnit::unit_name("assemble"), "run-script:assemble");
    }
}
